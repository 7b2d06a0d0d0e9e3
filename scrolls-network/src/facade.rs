//! High-level client facade over a single N2N connection

use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::miniprotocols::handshake::{self, Confirmation, RefuseReason, VersionNumber};
use crate::miniprotocols::{
    blockfetch, chainsync, keepalive, PROTOCOL_N2N_BLOCK_FETCH, PROTOCOL_N2N_CHAIN_SYNC,
    PROTOCOL_N2N_HANDSHAKE, PROTOCOL_N2N_KEEP_ALIVE,
};
use crate::multiplexer::{self, Bearer, Plexer, RunningPlexer};

pub const DEFAULT_KEEP_ALIVE_INTERVAL_SEC: u64 = 20;

/// TCP connect + handshake budget per the network spec
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum Error {
    #[error("error connecting bearer")]
    ConnectFailure(#[source] tokio::io::Error),

    #[error("timeout connecting bearer")]
    ConnectTimeout,

    #[error("handshake protocol error")]
    HandshakeProtocol(#[source] handshake::ClientError),

    #[error("handshake refused by peer: {0:?}")]
    HandshakeRefused(RefuseReason),

    #[error("handshake ended in an unexpected query reply")]
    HandshakeQueryReply,

    #[error("no endpoint in the topology could be reached")]
    NoUsableEndpoint,

    #[error("error in multiplexer")]
    PlexerFailure(#[source] multiplexer::Error),
}

pub type KeepAliveHandle = tokio::task::JoinHandle<Result<(), keepalive::AgentError>>;

/// Client of N2N Ouroboros
pub struct PeerClient {
    pub plexer: RunningPlexer,
    pub keepalive: KeepAliveHandle,
    pub chainsync: chainsync::Client,
    pub blockfetch: blockfetch::Client,
    negotiated_version: VersionNumber,
}

impl PeerClient {
    pub async fn connect(addr: impl AsRef<str>, magic: u64) -> Result<Self, Error> {
        let addr = addr.as_ref();

        let bearer = tokio::time::timeout(CONNECT_TIMEOUT, Bearer::connect_tcp(addr))
            .await
            .map_err(|_| Error::ConnectTimeout)?
            .map_err(Error::ConnectFailure)?;

        let mut plexer = Plexer::new(bearer);

        let hs_channel = plexer.subscribe_client(PROTOCOL_N2N_HANDSHAKE);
        let cs_channel = plexer.subscribe_client(PROTOCOL_N2N_CHAIN_SYNC);
        let bf_channel = plexer.subscribe_client(PROTOCOL_N2N_BLOCK_FETCH);
        let ka_channel = plexer.subscribe_client(PROTOCOL_N2N_KEEP_ALIVE);

        let plexer = plexer.spawn();

        let mut handshake = handshake::Client::new(hs_channel);
        let versions = handshake::VersionTable::v14(magic);

        let confirmation = handshake
            .handshake(versions)
            .await
            .map_err(Error::HandshakeProtocol)?;

        let negotiated_version = match confirmation {
            Confirmation::Accepted(version, data) => {
                debug!(version, ?data, "handshake accepted");
                version
            }
            Confirmation::Rejected(reason) => {
                error!(?reason, "handshake refused");
                plexer.abort().await;
                return Err(Error::HandshakeRefused(reason));
            }
            Confirmation::QueryReply(_) => {
                plexer.abort().await;
                return Err(Error::HandshakeQueryReply);
            }
        };

        let keepalive = keepalive::Agent::new(ka_channel);
        let keepalive = tokio::spawn(
            keepalive.run(Duration::from_secs(DEFAULT_KEEP_ALIVE_INTERVAL_SEC)),
        );

        Ok(Self {
            plexer,
            keepalive,
            chainsync: chainsync::Client::new(cs_channel),
            blockfetch: blockfetch::Client::new(bf_channel),
            negotiated_version,
        })
    }

    /// Walks a list of `(host, port)` endpoints, returning the first
    /// connection that completes a handshake.
    ///
    /// Transport failures and timeouts rotate to the next endpoint; a peer
    /// that actively refuses the handshake does too.
    pub async fn connect_any(endpoints: &[(String, u16)], magic: u64) -> Result<Self, Error> {
        for (host, port) in endpoints {
            let addr = format!("{host}:{port}");

            match Self::connect(&addr, magic).await {
                Ok(client) => return Ok(client),
                Err(err) => {
                    warn!(%addr, %err, "endpoint failed, trying next");
                }
            }
        }

        Err(Error::NoUsableEndpoint)
    }

    pub fn negotiated_version(&self) -> VersionNumber {
        self.negotiated_version
    }

    pub fn chainsync(&mut self) -> &mut chainsync::Client {
        &mut self.chainsync
    }

    pub fn blockfetch(&mut self) -> &mut blockfetch::Client {
        &mut self.blockfetch
    }

    /// Cancels the connection: the keep-alive agent and demultiplexer stop
    /// and the TCP socket is closed best-effort.
    pub async fn abort(self) {
        self.keepalive.abort();
        self.plexer.abort().await;
    }
}
