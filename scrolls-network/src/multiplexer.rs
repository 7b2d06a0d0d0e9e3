//! A multiplexer of several mini-protocols through a single bearer

use scrolls_codec::{minicbor, Fragment};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::select;
use tokio::sync::mpsc::error::{SendError, TrySendError};
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

use crate::bearer::{self, Payload, Protocol, SegmentBuffer, RESPONDER_BIT};
pub use crate::bearer::Bearer;

pub use crate::bearer::MAX_SEGMENT_PAYLOAD_LENGTH;

/// Depth of the per-protocol inbound queue.
///
/// A well-behaved peer only pipelines a handful of messages per
/// mini-protocol; outrunning the consumer by this much is a protocol
/// violation and aborts the connection.
const DEMUX_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failure to decode channel message")]
    Decoding(String),

    #[error("failure to encode channel message")]
    Encoding(String),

    #[error("agent failed to enqueue chunk for protocol {0}")]
    AgentEnqueue(Protocol, Payload),

    #[error("agent channel closed while dequeuing chunk")]
    ChannelClosed,

    #[error("inbound queue overflow for protocol {0}")]
    DemuxOverflow(Protocol),

    #[error("bearer IO error")]
    Bearer(#[source] bearer::Error),

    #[error("timeout waiting for message")]
    Timeout,
}

pub struct AgentChannel {
    enqueue_protocol: Protocol,
    to_plexer: tokio::sync::mpsc::Sender<(Protocol, Payload)>,
    from_plexer: tokio::sync::mpsc::Receiver<Payload>,
}

impl AgentChannel {
    pub async fn enqueue_chunk(&mut self, chunk: Payload) -> Result<(), Error> {
        self.to_plexer
            .send((self.enqueue_protocol, chunk))
            .await
            .map_err(|SendError((protocol, payload))| Error::AgentEnqueue(protocol, payload))
    }

    pub async fn dequeue_chunk(&mut self) -> Result<Payload, Error> {
        self.from_plexer.recv().await.ok_or(Error::ChannelClosed)
    }
}

type Ingress = (
    tokio::sync::mpsc::Sender<(Protocol, Payload)>,
    tokio::sync::mpsc::Receiver<(Protocol, Payload)>,
);

/// One bounded queue per subscribed protocol, keyed by the wire value of
/// inbound frames (responder bit set)
type Egress = HashMap<Protocol, tokio::sync::mpsc::Sender<Payload>>;

pub struct Plexer {
    clock: Instant,
    bearer: SegmentBuffer,
    ingress: Ingress,
    egress: Egress,
}

impl Plexer {
    pub fn new(bearer: Bearer) -> Self {
        Self {
            clock: Instant::now(),
            bearer: SegmentBuffer::new(bearer),
            ingress: tokio::sync::mpsc::channel(100),
            egress: HashMap::new(),
        }
    }

    /// Registers a client-side agent for a mini-protocol.
    ///
    /// Outbound frames carry the bare protocol number (initiator mode);
    /// inbound frames are matched on the responder-mode value.
    pub fn subscribe_client(&mut self, protocol: Protocol) -> AgentChannel {
        let (tx, rx) = tokio::sync::mpsc::channel(DEMUX_QUEUE_DEPTH);
        self.egress.insert(protocol | RESPONDER_BIT, tx);

        AgentChannel {
            enqueue_protocol: protocol,
            to_plexer: self.ingress.0.clone(),
            from_plexer: rx,
        }
    }

    /// Registers a server-side agent. Only used by test fixtures acting as
    /// a scripted peer.
    pub fn subscribe_server(&mut self, protocol: Protocol) -> AgentChannel {
        let (tx, rx) = tokio::sync::mpsc::channel(DEMUX_QUEUE_DEPTH);
        self.egress.insert(protocol, tx);

        AgentChannel {
            enqueue_protocol: protocol | RESPONDER_BIT,
            to_plexer: self.ingress.0.clone(),
            from_plexer: rx,
        }
    }

    async fn mux(&mut self, msg: (Protocol, Payload)) -> Result<(), Error> {
        self.bearer
            .write_segment(msg.0, &self.clock, &msg.1)
            .await
            .map_err(Error::Bearer)?;

        if tracing::event_enabled!(tracing::Level::TRACE) {
            trace!(
                protocol = msg.0,
                data = hex::encode(&msg.1),
                "write to bearer"
            );
        }

        Ok(())
    }

    fn demux(&mut self, protocol: Protocol, payload: Payload) -> Result<(), Error> {
        if tracing::event_enabled!(tracing::Level::TRACE) {
            trace!(protocol, data = hex::encode(&payload), "read from bearer");
        }

        match self.egress.get(&protocol) {
            Some(tx) => match tx.try_send(payload) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(Error::DemuxOverflow(protocol)),
                Err(TrySendError::Closed(_)) => {
                    trace!(protocol, "agent is gone, dropping frame");
                    Ok(())
                }
            },
            None => {
                warn!(protocol, "frame for unknown protocol, dropping");
                Ok(())
            }
        }
    }

    pub async fn run(mut self) -> Result<(), Error> {
        loop {
            select! {
                res = self.bearer.read_segment() => {
                    let (protocol, payload) = res.map_err(Error::Bearer)?;
                    self.demux(protocol, payload)?
                },
                Some(msg) = self.ingress.1.recv() => {
                    self.mux(msg).await?
                },
            }
        }
    }

    pub fn spawn(self) -> RunningPlexer {
        let task = tokio::spawn(async move {
            if let Err(err) = self.run().await {
                debug!(?err, "plexer stopped");
            }
        });

        RunningPlexer { task }
    }
}

/// Handle over the background demultiplexer task
pub struct RunningPlexer {
    task: tokio::task::JoinHandle<()>,
}

impl RunningPlexer {
    /// Cancels the demultiplexer and drops the bearer, closing the TCP
    /// connection best-effort. Pending agent receives fail afterwards.
    pub async fn abort(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

fn try_decode_message<M>(buffer: &mut Vec<u8>) -> Result<Option<M>, Error>
where
    M: Fragment,
{
    let mut decoder = minicbor::Decoder::new(buffer);
    let maybe_msg = decoder.decode();

    match maybe_msg {
        Ok(msg) => {
            let pos = decoder.position();
            buffer.drain(0..pos);
            Ok(Some(msg))
        }
        Err(err) if err.is_end_of_input() => Ok(None),
        Err(err) => {
            error!(?err);
            trace!("{}", hex::encode(buffer));
            Err(Error::Decoding(err.to_string()))
        }
    }
}

/// A channel abstraction to hide the complexity of partial payloads
pub struct ChannelBuffer {
    channel: AgentChannel,
    temp: Vec<u8>,
}

impl ChannelBuffer {
    pub fn new(channel: AgentChannel) -> Self {
        Self {
            channel,
            temp: Vec::new(),
        }
    }

    /// Enqueues a msg as a sequence of payload chunks
    pub async fn send_msg_chunks<M>(&mut self, msg: &M) -> Result<(), Error>
    where
        M: Fragment,
    {
        let mut payload = Vec::new();
        minicbor::encode(msg, &mut payload).map_err(|err| Error::Encoding(err.to_string()))?;

        let chunks = payload.chunks(MAX_SEGMENT_PAYLOAD_LENGTH);

        for chunk in chunks {
            self.channel.enqueue_chunk(Vec::from(chunk)).await?;
        }

        Ok(())
    }

    /// Reads from the channel until a complete message is found
    pub async fn recv_full_msg<M>(&mut self) -> Result<M, Error>
    where
        M: Fragment,
    {
        trace!(len = self.temp.len(), "waiting for full message");

        if !self.temp.is_empty() {
            if let Some(msg) = try_decode_message::<M>(&mut self.temp)? {
                return Ok(msg);
            }
        }

        loop {
            let chunk = self.channel.dequeue_chunk().await?;
            self.temp.extend(chunk);

            if let Some(msg) = try_decode_message::<M>(&mut self.temp)? {
                return Ok(msg);
            }

            trace!("not enough data");
        }
    }

    /// Like [`Self::recv_full_msg`] but bounded by a deadline
    pub async fn recv_full_msg_timeout<M>(&mut self, deadline: Duration) -> Result<M, Error>
    where
        M: Fragment,
    {
        tokio::time::timeout(deadline, self.recv_full_msg())
            .await
            .map_err(|_| Error::Timeout)?
    }

    pub fn unwrap(self) -> AgentChannel {
        self.channel
    }
}

impl From<AgentChannel> for ChannelBuffer {
    fn from(channel: AgentChannel) -> Self {
        ChannelBuffer::new(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_channel(protocol: Protocol) -> (AgentChannel, tokio::sync::mpsc::Sender<Payload>) {
        let ingress = tokio::sync::mpsc::channel(100);
        let (tx, rx) = tokio::sync::mpsc::channel(DEMUX_QUEUE_DEPTH);

        let channel = AgentChannel {
            enqueue_protocol: protocol,
            to_plexer: ingress.0.clone(),
            from_plexer: rx,
        };

        // keep ingress alive for the duration of the test
        std::mem::forget(ingress);

        (channel, tx)
    }

    #[tokio::test]
    async fn multiple_messages_in_same_payload() {
        let mut input = Vec::new();
        let in_part1 = (1u8, 2u8, 3u8);
        let in_part2 = (6u8, 5u8, 4u8);

        minicbor::encode(in_part1, &mut input).unwrap();
        minicbor::encode(in_part2, &mut input).unwrap();

        let (channel, tx) = loopback_channel(0);
        tx.send(input).await.unwrap();

        let mut buf = ChannelBuffer::new(channel);

        let out_part1 = buf.recv_full_msg::<(u8, u8, u8)>().await.unwrap();
        let out_part2 = buf.recv_full_msg::<(u8, u8, u8)>().await.unwrap();

        assert_eq!(in_part1, out_part1);
        assert_eq!(in_part2, out_part2);
    }

    #[tokio::test]
    async fn fragmented_message_in_multiple_payloads() {
        let mut input = Vec::new();
        let msg = (11u8, 12u8, 13u8, 14u8, 15u8, 16u8, 17u8);
        minicbor::encode(msg, &mut input).unwrap();

        let (channel, tx) = loopback_channel(0);

        while !input.is_empty() {
            let chunk = Vec::from(input.drain(0..2).as_slice());
            tx.send(chunk).await.unwrap();
        }

        let mut buf = ChannelBuffer::new(channel);

        let out_msg = buf
            .recv_full_msg::<(u8, u8, u8, u8, u8, u8, u8)>()
            .await
            .unwrap();

        assert_eq!(msg, out_msg);
    }

    #[tokio::test]
    async fn recv_timeout_expires_cleanly() {
        let (channel, _tx) = loopback_channel(0);
        let mut buf = ChannelBuffer::new(channel);

        let result = buf
            .recv_full_msg_timeout::<(u8, u8)>(Duration::from_millis(20))
            .await;

        assert!(matches!(result, Err(Error::Timeout)));
    }
}
