//! # Peercall Media
//!
//! Local capture devices and media tracks for peercall sessions.
//!
//! Device access goes through the [`MediaDevices`] trait so the session
//! state machine never talks to platform capture APIs directly; embedders
//! supply the platform backend and [`MockDevices`] covers tests and
//! environments without hardware. A [`LocalCapture`] owns the acquired
//! tracks and releases the device handle exactly once.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod capture;
pub mod error;
pub mod tracks;

// Re-export main types
pub use capture::{CaptureConstraints, LocalCapture, MediaDevices, MockDevices};
pub use error::MediaError;
pub use tracks::{AudioTrack, RemoteAudioSink, RemoteVideoSink, VideoTrack};
