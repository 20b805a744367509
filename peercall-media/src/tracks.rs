//! Track abstractions and playback sinks
//!
//! Local tracks carry a shared `enabled` flag: disabling a track mutes it at
//! the source without renegotiating the connection, matching how the call
//! widget's mic/camera toggles behave. Remote sinks model local playback
//! only; muting a sink never reaches the remote party.

use peercall_core::MediaKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Local audio track backed by a microphone capture
#[derive(Debug, Clone)]
pub struct AudioTrack {
    id: String,
    enabled: Arc<AtomicBool>,
    live: Arc<AtomicBool>,
}

impl AudioTrack {
    /// Create a new live, enabled track
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: Arc::new(AtomicBool::new(true)),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Get track ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Track kind (always audio)
    pub fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    /// Whether the track currently produces media
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable the track without renegotiation
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether the underlying capture is still running
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

/// Local video track backed by a camera capture
#[derive(Debug, Clone)]
pub struct VideoTrack {
    id: String,
    enabled: Arc<AtomicBool>,
    live: Arc<AtomicBool>,
}

impl VideoTrack {
    /// Create a new live, enabled track
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: Arc::new(AtomicBool::new(true)),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Get track ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Track kind (always video)
    pub fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    /// Whether the track currently produces media
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enable or disable the track without renegotiation
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether the underlying capture is still running
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

/// Local playback handle for a remote party's audio.
///
/// The speaker toggle flips the `muted` flag here and nowhere else: the
/// connection and the remote party are never involved.
#[derive(Debug, Clone)]
pub struct RemoteAudioSink {
    id: String,
    muted: Arc<AtomicBool>,
}

impl RemoteAudioSink {
    /// Create an unmuted sink for a remote track
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            muted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Remote track ID this sink plays
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether local playback is muted
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Mute or unmute local playback
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }
}

/// Local rendering handle for a remote party's video
#[derive(Debug, Clone)]
pub struct RemoteVideoSink {
    id: String,
}

impl RemoteVideoSink {
    /// Create a sink for a remote track
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Remote track ID this sink renders
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_toggle_flips_only_enabled_flag() {
        let track = AudioTrack::new("mic-0");
        assert!(track.is_enabled());
        assert!(track.is_live());

        track.set_enabled(false);
        assert!(!track.is_enabled());
        assert!(track.is_live());

        track.set_enabled(true);
        assert!(track.is_enabled());
    }

    #[test]
    fn sink_mute_is_independent_of_tracks() {
        let sink = RemoteAudioSink::new("remote-audio");
        assert!(!sink.is_muted());
        sink.set_muted(true);
        assert!(sink.is_muted());
        sink.set_muted(false);
        assert!(!sink.is_muted());
    }
}
