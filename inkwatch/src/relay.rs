// THEORY:
// The relay is the fan-out between the camera and its viewers. Every published
// frame goes to every subscriber except the client that sent it, as shared bytes
// that nobody decodes until a viewer's session needs them.
//
// The underlying channel is a small tokio `broadcast`. A viewer that falls behind
// is lagged past the frames it missed rather than slowing the sender down; the
// session behind it only cares about the newest frame anyway.

use crate::codec::{self, CodecError};
use crate::core_modules::frame::Frame;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info};

pub type ClientId = u64;

/// How often the relay logs its running frame count.
pub const LOG_EVERY: u64 = 100;

/// One compressed frame on its way through the relay.
#[derive(Debug, Clone)]
pub struct FramePacket {
    pub seq: u64,
    pub origin: ClientId,
    pub received: Instant,
    pub data: Arc<[u8]>,
}

impl FramePacket {
    pub fn decode(&self) -> Result<Frame, CodecError> {
        codec::decode_image(&self.data)
    }
}

#[derive(Clone)]
pub struct FrameRelay {
    frames_tx: broadcast::Sender<FramePacket>,
    relayed: Arc<AtomicU64>,
    next_client: Arc<AtomicU64>,
}

impl FrameRelay {
    pub fn new(capacity: usize) -> Self {
        let (frames_tx, _) = broadcast::channel::<FramePacket>(capacity.max(1));
        Self {
            frames_tx,
            relayed: Arc::new(AtomicU64::new(0)),
            next_client: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Hands out a fresh client id.
    pub fn register(&self) -> ClientId {
        self.next_client.fetch_add(1, Ordering::Relaxed)
    }

    /// Publishes a frame to every current subscriber. Returns how many receivers
    /// the packet reached, the origin's own subscription included.
    pub fn publish(&self, origin: ClientId, data: impl Into<Arc<[u8]>>) -> usize {
        let seq = self.relayed.fetch_add(1, Ordering::Relaxed) + 1;
        if seq % LOG_EVERY == 0 {
            info!(frames = seq, viewers = self.viewers(), "relayed frames");
        }
        let packet = FramePacket {
            seq,
            origin,
            received: Instant::now(),
            data: data.into(),
        };
        // No subscribers is not an error; the frame is simply not seen.
        self.frames_tx.send(packet).unwrap_or(0)
    }

    pub fn subscribe(&self, client: ClientId) -> RelayReceiver {
        RelayReceiver {
            client,
            frames_rx: self.frames_tx.subscribe(),
        }
    }

    pub fn frames_relayed(&self) -> u64 {
        self.relayed.load(Ordering::Relaxed)
    }

    pub fn viewers(&self) -> usize {
        self.frames_tx.receiver_count()
    }
}

pub struct RelayReceiver {
    client: ClientId,
    frames_rx: broadcast::Receiver<FramePacket>,
}

impl RelayReceiver {
    pub fn client(&self) -> ClientId {
        self.client
    }

    /// Waits for the next frame not sent by this client. `None` once the relay is gone.
    pub async fn recv(&mut self) -> Option<FramePacket> {
        loop {
            match self.frames_rx.recv().await {
                Ok(packet) if packet.origin == self.client => continue,
                Ok(packet) => return Some(packet),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(client = self.client, missed, "viewer lagged behind the relay");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
