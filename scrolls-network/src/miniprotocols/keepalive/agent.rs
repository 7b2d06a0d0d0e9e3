use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::multiplexer;

use super::{Cookie, Message};

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("keepalive cookie mismatch")]
    CookieMismatch,

    #[error("peer did not answer the previous keepalive probe")]
    ResponseTimeout,

    #[error("error while sending or receiving data through the channel")]
    Plexer(#[source] multiplexer::Error),
}

/// Agent owning the keep-alive channel of a connection.
///
/// [`Agent::run`] probes the peer with a fresh cookie every `period` and
/// answers peer-initiated probes in between. A probe left unanswered for a
/// full period fails the agent, which the facade treats as a dead peer.
pub struct Agent {
    buffer: multiplexer::ChannelBuffer,
    pending: Option<Cookie>,
}

impl Agent {
    pub fn new(channel: multiplexer::AgentChannel) -> Self {
        Self {
            buffer: multiplexer::ChannelBuffer::new(channel),
            pending: None,
        }
    }

    async fn send_request(&mut self) -> Result<(), AgentError> {
        if self.pending.is_some() {
            return Err(AgentError::ResponseTimeout);
        }

        let cookie = rand::thread_rng().gen::<Cookie>();
        let msg = Message::KeepAlive(cookie);

        self.buffer
            .send_msg_chunks(&msg)
            .await
            .map_err(AgentError::Plexer)?;

        self.pending = Some(cookie);
        debug!(cookie, "keepalive probe sent");

        Ok(())
    }

    async fn send_response(&mut self, cookie: Cookie) -> Result<(), AgentError> {
        let msg = Message::ResponseKeepAlive(cookie);

        self.buffer
            .send_msg_chunks(&msg)
            .await
            .map_err(AgentError::Plexer)?;

        debug!(cookie, "answered peer keepalive probe");

        Ok(())
    }

    fn confirm(&mut self, cookie: Cookie) -> Result<(), AgentError> {
        match self.pending.take() {
            Some(expected) if expected == cookie => {
                debug!(cookie, "keepalive roundtrip confirmed");
                Ok(())
            }
            _ => Err(AgentError::CookieMismatch),
        }
    }

    pub async fn run(mut self, period: Duration) -> Result<(), AgentError> {
        self.send_request().await?;

        loop {
            match tokio::time::timeout(period, self.buffer.recv_full_msg::<Message>()).await {
                Ok(msg) => match msg.map_err(AgentError::Plexer)? {
                    Message::KeepAlive(cookie) => self.send_response(cookie).await?,
                    Message::ResponseKeepAlive(cookie) => self.confirm(cookie)?,
                    Message::Done => break Ok(()),
                },
                // quiet period elapsed; probe again
                Err(_) => self.send_request().await?,
            }
        }
    }
}
