//! Bounded queue carrying encoded packets downstream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::warn;

use crate::{EncodedPacket, EncoderError, EncoderResult, ENCODED_CHANNEL_CAPACITY};

/// Creates a bounded packet channel.
pub fn packet_channel() -> (PacketSink, Receiver<EncodedPacket>) {
    let (tx, rx) = crossbeam_channel::bounded(ENCODED_CHANNEL_CAPACITY);
    (PacketSink::new(tx), rx)
}

/// Sending half of the packet channel, shared by every engine.
#[derive(Clone)]
pub struct PacketSink {
    tx: Sender<EncodedPacket>,
    dropped: Arc<AtomicU64>,
}

impl PacketSink {
    /// Wrap a packet sender.
    pub fn new(tx: Sender<EncodedPacket>) -> Self {
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue a packet without blocking.
    ///
    /// A full queue drops the packet and returns [`EncoderError::Overload`].
    pub fn try_push(&self, packet: EncodedPacket) -> EncoderResult<()> {
        match self.tx.try_send(packet) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(EncoderError::Overload(self.tx.len()))
            }
            Err(TrySendError::Disconnected(_)) => Err(EncoderError::ChannelDisconnected),
        }
    }

    /// Queue a packet, tolerating overload.
    ///
    /// Overload is logged and counted; only a disconnected receiver fails.
    pub fn emit(&self, packet: EncodedPacket) -> EncoderResult<()> {
        match self.try_push(packet) {
            Err(EncoderError::Overload(depth)) => {
                warn!(depth, "Packet queue full, dropping packet");
                Ok(())
            }
            other => other,
        }
    }

    /// Packets dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
