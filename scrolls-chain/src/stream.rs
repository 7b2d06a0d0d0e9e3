//! Pull-based header streaming over a chain-sync client

use scrolls_network::miniprotocols::chainsync::{self, HeaderContent, NextResponse};
use scrolls_network::miniprotocols::Point;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("chain-sync client error")]
    Client(#[source] chainsync::ClientError),

    #[error("roll-forward header could not be decoded")]
    Header(#[from] crate::header::HeaderError),
}

/// Streams `(point, header)` pairs forward from the current intersection.
///
/// Rollbacks are logged and skipped; the stream ends cleanly after `max`
/// headers or once `idle_timeout` passes without forward progress.
pub struct HeaderStream<'a> {
    client: &'a mut chainsync::Client,
    remaining: usize,
    idle_timeout: Duration,
}

impl<'a> HeaderStream<'a> {
    pub fn new(client: &'a mut chainsync::Client, max: usize, idle_timeout: Duration) -> Self {
        Self {
            client,
            remaining: max,
            idle_timeout,
        }
    }

    pub async fn next(&mut self) -> Result<Option<(Point, HeaderContent)>, StreamError> {
        while self.remaining > 0 {
            let response = match self.client.request_next().await {
                Ok(NextResponse::Await) => {
                    match self.client.recv_while_must_reply(self.idle_timeout).await {
                        Ok(response) => response,
                        Err(chainsync::ClientError::Timeout) => return Ok(None),
                        Err(err) => return Err(StreamError::Client(err)),
                    }
                }
                Ok(response) => response,
                Err(chainsync::ClientError::Timeout) => return Ok(None),
                Err(err) => return Err(StreamError::Client(err)),
            };

            match response {
                NextResponse::RollForward(header, _tip) => {
                    let point = crate::header::header_point(&header)?;
                    self.remaining -= 1;
                    return Ok(Some((point, header)));
                }
                NextResponse::RollBackward(point, _tip) => {
                    warn!(?point, "chain rollback encountered; continuing");
                    continue;
                }
                NextResponse::Await => unreachable!("await is resolved above"),
            }
        }

        Ok(None)
    }
}
