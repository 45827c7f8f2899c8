//! Per-channel contexts, created on a channel's first frame.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use chanenc_encoder::{EncoderSession, TargetFormat};
use chanenc_frame::{ChannelId, PixelFormat};

/// Everything the module keeps for one channel.
pub struct ChannelContext {
    channel_id: ChannelId,
    session: EncoderSession,
    source_format: PixelFormat,
    target_format: TargetFormat,
    open_error: Option<String>,
    eos_reached: bool,
}

/// Context shared between the registry and the thread encoding the channel.
pub type SharedContext = Arc<Mutex<ChannelContext>>;

impl ChannelContext {
    /// Wrap a session. `open_error` records a failed engine open.
    pub fn new(
        channel_id: ChannelId,
        session: EncoderSession,
        source_format: PixelFormat,
        target_format: TargetFormat,
        open_error: Option<String>,
    ) -> Self {
        Self {
            channel_id,
            session,
            source_format,
            target_format,
            open_error,
            eos_reached: false,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// Format the session was opened with.
    pub fn target_format(&self) -> TargetFormat {
        self.target_format
    }

    /// Why the engine failed to open, if it did.
    pub fn open_error(&self) -> Option<&str> {
        self.open_error.as_deref()
    }

    pub fn session_mut(&mut self) -> &mut EncoderSession {
        &mut self.session
    }

    /// Returns true once end of stream has been routed to the session.
    pub fn eos_reached(&self) -> bool {
        self.eos_reached
    }

    pub fn mark_eos(&mut self) {
        self.eos_reached = true;
    }

    /// Check a later frame's format against the one detected on the first.
    ///
    /// The session keeps its format; a differing frame is only reported.
    /// Returns true if the formats match.
    pub fn observe_format(&self, format: &PixelFormat) -> bool {
        if *format == self.source_format {
            return true;
        }
        warn!(
            channel = self.channel_id,
            frame_format = %format,
            source_format = %self.source_format,
            session_format = %self.target_format,
            "Pixel format changed mid-stream, keeping session format"
        );
        false
    }
}

/// Maps channel ids to their contexts.
///
/// At most one context ever exists per channel id. Contexts are only
/// removed by [`ChannelRegistry::drain_all`].
#[derive(Default)]
pub struct ChannelRegistry {
    contexts: Mutex<HashMap<ChannelId, SharedContext>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a channel's context, creating it with `create` if absent.
    ///
    /// `create` runs under the registry lock, so concurrent first frames for
    /// one channel produce exactly one context. Returns the context and
    /// whether it was created by this call.
    pub fn get_or_create<F>(&self, channel_id: ChannelId, create: F) -> (SharedContext, bool)
    where
        F: FnOnce() -> ChannelContext,
    {
        let mut contexts = self.contexts.lock();
        if let Some(ctx) = contexts.get(&channel_id) {
            return (Arc::clone(ctx), false);
        }
        let ctx = Arc::new(Mutex::new(create()));
        contexts.insert(channel_id, Arc::clone(&ctx));
        (ctx, true)
    }

    /// Look up a channel's context.
    pub fn get(&self, channel_id: ChannelId) -> Option<SharedContext> {
        self.contexts.lock().get(&channel_id).cloned()
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.lock().is_empty()
    }

    /// Registered channel ids, in ascending order.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        let mut ids: Vec<_> = self.contexts.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Remove and return every context.
    pub fn drain_all(&self) -> Vec<SharedContext> {
        self.contexts.lock().drain().map(|(_, ctx)| ctx).collect()
    }
}
