//! Capture device acquisition and release

use crate::error::MediaError;
use crate::tracks::{AudioTrack, VideoTrack};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Which tracks to request when acquiring a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    /// Request a microphone track
    pub audio: bool,
    /// Request a camera track
    pub video: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Exclusive handle over acquired capture tracks.
///
/// A call session owns at most one of these at a time. `stop` releases the
/// device handle and is safe to call more than once; dropping the capture
/// releases it as a backstop.
#[derive(Debug)]
pub struct LocalCapture {
    audio: Option<AudioTrack>,
    video: Option<VideoTrack>,
    released: Arc<AtomicBool>,
}

impl LocalCapture {
    /// Create a capture from already-acquired tracks
    pub fn new(audio: Option<AudioTrack>, video: Option<VideoTrack>) -> Self {
        Self::with_release_flag(audio, video, Arc::new(AtomicBool::new(false)))
    }

    pub(crate) fn with_release_flag(
        audio: Option<AudioTrack>,
        video: Option<VideoTrack>,
        released: Arc<AtomicBool>,
    ) -> Self {
        Self {
            audio,
            video,
            released,
        }
    }

    /// The microphone track, if one was requested and granted
    pub fn audio_track(&self) -> Option<&AudioTrack> {
        self.audio.as_ref()
    }

    /// The camera track, if one was requested and granted
    pub fn video_track(&self) -> Option<&VideoTrack> {
        self.video.as_ref()
    }

    /// Stop all tracks and release the device handle. Idempotent.
    pub fn stop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(track) = &self.audio {
            track.stop();
        }
        if let Some(track) = &self.video {
            track.stop();
        }
        tracing::debug!("local capture released");
    }

    /// Whether the device handle has been released
    pub fn is_stopped(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl Drop for LocalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Access to the local capture hardware.
///
/// Acquisition is asynchronous: on real platforms it spans a permission
/// prompt and hardware init. Implementations return `MediaError` when the
/// user denies access or no device exists; the session rolls back without
/// signaling anything.
#[async_trait::async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire camera and/or microphone per the constraints
    async fn acquire(&self, constraints: CaptureConstraints) -> Result<LocalCapture, MediaError>;
}

/// Mock device backend for tests and hardware-less environments
#[derive(Debug, Default)]
pub struct MockDevices {
    deny: AtomicBool,
    acquired: AtomicUsize,
    handles: Mutex<Vec<Arc<AtomicBool>>>,
}

impl MockDevices {
    /// Create a backend that grants every request
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend that denies every request
    pub fn denying() -> Self {
        let devices = Self::default();
        devices.deny.store(true, Ordering::SeqCst);
        devices
    }

    /// Change whether requests are denied
    pub fn set_deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    /// Number of successful acquisitions so far
    pub fn acquisitions(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Number of captures acquired from this backend that have not been
    /// released yet
    pub fn live_captures(&self) -> usize {
        self.handles
            .lock()
            .iter()
            .filter(|released| !released.load(Ordering::SeqCst))
            .count()
    }
}

#[async_trait::async_trait]
impl MediaDevices for MockDevices {
    async fn acquire(&self, constraints: CaptureConstraints) -> Result<LocalCapture, MediaError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(MediaError::AccessDenied {
                reason: "permission denied".to_string(),
            });
        }

        self.acquired.fetch_add(1, Ordering::SeqCst);
        let released = Arc::new(AtomicBool::new(false));
        self.handles.lock().push(Arc::clone(&released));

        let audio = constraints
            .audio
            .then(|| AudioTrack::new(format!("mock-audio-{}", Uuid::new_v4())));
        let video = constraints
            .video
            .then(|| VideoTrack::new(format!("mock-video-{}", Uuid::new_v4())));

        Ok(LocalCapture::with_release_flag(audio, video, released))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_honors_constraints() {
        let devices = MockDevices::new();
        let capture = devices
            .acquire(CaptureConstraints {
                audio: true,
                video: false,
            })
            .await
            .unwrap();

        assert!(capture.audio_track().is_some());
        assert!(capture.video_track().is_none());
        assert_eq!(devices.acquisitions(), 1);
    }

    #[tokio::test]
    async fn denied_access_surfaces_as_error() {
        let devices = MockDevices::denying();
        let result = devices.acquire(CaptureConstraints::default()).await;
        assert!(matches!(result, Err(MediaError::AccessDenied { .. })));
        assert_eq!(devices.acquisitions(), 0);
        assert_eq!(devices.live_captures(), 0);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_releases_tracks() {
        let devices = MockDevices::new();
        let mut capture = devices.acquire(CaptureConstraints::default()).await.unwrap();
        assert_eq!(devices.live_captures(), 1);

        let audio = capture.audio_track().unwrap().clone();
        capture.stop();
        capture.stop();

        assert!(capture.is_stopped());
        assert!(!audio.is_live());
        assert_eq!(devices.live_captures(), 0);
    }

    #[tokio::test]
    async fn drop_releases_the_device_handle() {
        let devices = MockDevices::new();
        {
            let _capture = devices.acquire(CaptureConstraints::default()).await.unwrap();
            assert_eq!(devices.live_captures(), 1);
        }
        assert_eq!(devices.live_captures(), 0);
    }
}
