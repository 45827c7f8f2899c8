//! Counters for module activity.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Why a frame was not submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// Preprocessing mode matched no adapter.
    UnknownMode,

    /// The frame had nothing the adapter could use.
    MissingPayload,

    /// The channel already reached end of stream.
    AfterEndOfStream,
}

/// Collects module counters. Safe to update from any thread.
#[derive(Debug, Default)]
pub struct ModuleMetrics {
    channels_opened: AtomicU64,
    frames_encoded: AtomicU64,
    unknown_mode_drops: AtomicU64,
    payload_drops: AtomicU64,
    after_eos_drops: AtomicU64,
    flushes: AtomicU64,
    failures: AtomicU64,
    sessions_closed: AtomicU64,
}

impl ModuleMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_channel_opened(&self) {
        self.channels_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_encoded(&self) {
        self.frames_encoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::UnknownMode => &self.unknown_mode_drops,
            DropReason::MissingPayload => &self.payload_drops,
            DropReason::AfterEndOfStream => &self.after_eos_drops,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let unknown_mode_drops = self.unknown_mode_drops.load(Ordering::Relaxed);
        let payload_drops = self.payload_drops.load(Ordering::Relaxed);
        let after_eos_drops = self.after_eos_drops.load(Ordering::Relaxed);

        MetricsSnapshot {
            channels_opened: self.channels_opened.load(Ordering::Relaxed),
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            dropped_frames: unknown_mode_drops + payload_drops + after_eos_drops,
            unknown_mode_drops,
            payload_drops,
            after_eos_drops,
            flushes: self.flushes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time module counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Channel contexts created.
    pub channels_opened: u64,

    /// Frames accepted by an engine.
    pub frames_encoded: u64,

    /// Total frames dropped.
    pub dropped_frames: u64,

    /// Frames dropped for an unknown preprocessing mode.
    pub unknown_mode_drops: u64,

    /// Frames dropped for lack of a usable payload.
    pub payload_drops: u64,

    /// Frames arriving after their channel's end of stream.
    pub after_eos_drops: u64,

    /// End-of-stream flushes issued.
    pub flushes: u64,

    /// Engine failures on open, update or flush.
    pub failures: u64,

    /// Sessions released at close.
    pub sessions_closed: u64,
}
