// Error taxonomy for the device link

/// Errors raised while talking to the device
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Cannot open port {port}: {source}")]
    Connect {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Timeout waiting for reply to '{command}'")]
    Timeout { command: String },

    #[error("Unexpected reply to '{command}': {reply:?} ({reason})")]
    Protocol {
        command: String,
        reply: String,
        reason: String,
    },

    #[error("No active connection")]
    Disconnected,

    #[error("Relay {0} does not exist (valid: 0-7)")]
    InvalidRelay(u8),

    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    /// True for failures after which the session stays usable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DeviceError::Timeout { .. } | DeviceError::Protocol { .. } | DeviceError::InvalidRelay(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
