//! Error types for media capture

use thiserror::Error;

/// Errors surfaced by capture devices and tracks
#[derive(Error, Debug)]
pub enum MediaError {
    /// Camera or microphone permission was denied by the platform
    #[error("Device access denied: {reason}")]
    AccessDenied {
        /// Reason reported by the device layer
        reason: String,
    },

    /// The capture device is held by another process or session
    #[error("Capture device busy")]
    DeviceBusy,

    /// No device of the requested kind is present
    #[error("No {kind} device available")]
    NoDevice {
        /// Device kind that was requested (camera, microphone)
        kind: String,
    },

    /// The track was stopped and can no longer be used
    #[error("Track has ended")]
    TrackEnded,
}
