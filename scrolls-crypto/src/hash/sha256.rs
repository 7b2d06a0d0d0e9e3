use crate::hash::Hash;

/// Streaming SHA-256 hasher for scroll content digests.
///
/// Scroll manifests pin their payloads with SHA-256, both before and after
/// compression; the same [`Hash<32>`] type carries the digest.
pub struct Sha256(cryptoxide::sha2::Sha256);

impl Sha256 {
    #[inline]
    pub fn new() -> Self {
        Self(cryptoxide::sha2::Sha256::new())
    }

    #[inline]
    pub fn input(&mut self, bytes: &[u8]) {
        use cryptoxide::digest::Digest as _;
        self.0.input(bytes);
    }

    /// convenient function to directly generate the digest of the given bytes
    #[inline]
    pub fn hash(bytes: &[u8]) -> Hash<32> {
        let mut hasher = Self::new();
        hasher.input(bytes);
        hasher.finalize()
    }

    pub fn finalize(mut self) -> Hash<32> {
        use cryptoxide::digest::Digest as _;
        let mut hash = [0; 32];
        self.0.result(&mut hash);
        Hash::new(hash)
    }
}

impl Default for Sha256 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        let digest = Sha256::hash(b"Hello, world!");

        assert_eq!(
            hex::encode(digest),
            "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
        );
    }
}
