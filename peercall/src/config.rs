//! Configuration types and defaults

use peercall_core::IceServerConfig;

/// Per-call configuration
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// STUN/TURN servers handed to the peer connector
    pub ice_servers: Vec<IceServerConfig>,
    /// Start with the microphone enabled
    pub mic_enabled: bool,
    /// Start with the camera enabled
    pub camera_enabled: bool,
    /// Start with remote audio audible
    pub speaker_enabled: bool,
    /// Signaling relay URL. When set and no channel is supplied to the
    /// builder, a relay client is connected to this URL instead.
    pub signaling_url: Option<String>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                IceServerConfig::stun("stun:stun.l.google.com:19302"),
                IceServerConfig::stun("stun:stun1.l.google.com:19302"),
            ],
            mic_enabled: true,
            camera_enabled: true,
            speaker_enabled: true,
            signaling_url: None,
        }
    }
}
