use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::multiplexer;

use super::{Message, RefuseReason, State, VersionData, VersionNumber, VersionTable};

/// Handshake SDU timeout per the network spec
pub const HANDSHAKE_SDU_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("attempted to receive message while agency is ours")]
    AgencyIsOurs,

    #[error("attempted to send message while agency is theirs")]
    AgencyIsTheirs,

    #[error("inbound message is not valid for current state")]
    InvalidInbound,

    #[error("outbound message is not valid for current state")]
    InvalidOutbound,

    #[error("error while sending or receiving data through the channel")]
    Plexer(#[source] multiplexer::Error),
}

/// Outcome of a finished handshake
#[derive(Debug)]
pub enum Confirmation {
    Accepted(VersionNumber, VersionData),
    Rejected(RefuseReason),
    QueryReply(VersionTable),
}

pub struct Client(State, multiplexer::ChannelBuffer);

impl Client {
    pub fn new(channel: multiplexer::AgentChannel) -> Self {
        Self(State::Propose, multiplexer::ChannelBuffer::new(channel))
    }

    pub fn state(&self) -> &State {
        &self.0
    }

    pub fn is_done(&self) -> bool {
        self.0 == State::Done
    }

    fn has_agency(&self) -> bool {
        match self.state() {
            State::Propose => true,
            State::Confirm => false,
            State::Done => false,
        }
    }

    fn assert_agency_is_ours(&self) -> Result<(), ClientError> {
        if !self.has_agency() {
            Err(ClientError::AgencyIsTheirs)
        } else {
            Ok(())
        }
    }

    fn assert_agency_is_theirs(&self) -> Result<(), ClientError> {
        if self.has_agency() {
            Err(ClientError::AgencyIsOurs)
        } else {
            Ok(())
        }
    }

    fn assert_outbound_state(&self, msg: &Message) -> Result<(), ClientError> {
        match (&self.0, msg) {
            (State::Propose, Message::Propose(_)) => Ok(()),
            _ => Err(ClientError::InvalidOutbound),
        }
    }

    fn assert_inbound_state(&self, msg: &Message) -> Result<(), ClientError> {
        match (&self.0, msg) {
            (State::Confirm, Message::Accept(..)) => Ok(()),
            (State::Confirm, Message::Refuse(_)) => Ok(()),
            (State::Confirm, Message::QueryReply(_)) => Ok(()),
            _ => Err(ClientError::InvalidInbound),
        }
    }

    pub async fn send_message(&mut self, msg: &Message) -> Result<(), ClientError> {
        self.assert_agency_is_ours()?;
        self.assert_outbound_state(msg)?;

        self.1
            .send_msg_chunks(msg)
            .await
            .map_err(ClientError::Plexer)?;

        Ok(())
    }

    pub async fn recv_message(&mut self) -> Result<Message, ClientError> {
        self.assert_agency_is_theirs()?;

        let msg = self
            .1
            .recv_full_msg_timeout(HANDSHAKE_SDU_TIMEOUT)
            .await
            .map_err(ClientError::Plexer)?;

        self.assert_inbound_state(&msg)?;

        Ok(msg)
    }

    pub async fn send_propose(&mut self, versions: VersionTable) -> Result<(), ClientError> {
        let msg = Message::Propose(versions);
        self.send_message(&msg).await?;
        self.0 = State::Confirm;

        debug!("versions proposed");

        Ok(())
    }

    pub async fn recv_while_confirm(&mut self) -> Result<Confirmation, ClientError> {
        match self.recv_message().await? {
            Message::Accept(version, data) => {
                self.0 = State::Done;
                debug!(version, "version accepted");
                Ok(Confirmation::Accepted(version, data))
            }
            Message::Refuse(reason) => {
                self.0 = State::Done;
                debug!(?reason, "handshake refused");
                Ok(Confirmation::Rejected(reason))
            }
            Message::QueryReply(table) => {
                self.0 = State::Done;
                Ok(Confirmation::QueryReply(table))
            }
            _ => Err(ClientError::InvalidInbound),
        }
    }

    pub async fn handshake(&mut self, versions: VersionTable) -> Result<Confirmation, ClientError> {
        self.send_propose(versions).await?;
        self.recv_while_confirm().await
    }
}
