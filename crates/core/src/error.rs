/// Result alias that carries the custom [`DiscoLightsError`] type.
pub type Result<T> = std::result::Result<T, DiscoLightsError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum DiscoLightsError {
    /// Free-form failure that does not fit any of the categories below.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Session file or bridge payload could not be (de)serialised.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Transport-level failure while talking to the bridge.
    #[error("bridge request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// No persisted session exists yet; pairing is required.
    #[error("no stored bridge session, pairing required")]
    Uninitialized,
    /// The bridge refused to pair because its link button was not pressed.
    #[error("link button not pressed on the bridge at {0}")]
    ButtonNotPressed(String),
    /// The operator interrupted the pairing wait.
    #[error("pairing interrupted by user")]
    PairingInterrupted,
    /// The bridge answered with an error entry.
    #[error("bridge at {address} rejected request: {description}")]
    Bridge { address: String, description: String },
    /// Audio device or stream failure.
    #[error("audio error: {0}")]
    Audio(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A pipeline operation was attempted from the wrong state.
    #[error("pipeline is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: crate::PipelineState,
        actual: crate::PipelineState,
    },
    /// Shared state was poisoned by a panicking thread.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
}

impl DiscoLightsError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Returns true for failures of the pairing handshake, which the binary
    /// reports with a dedicated diagnostic.
    pub fn is_pairing_failure(&self) -> bool {
        matches!(self, Self::ButtonNotPressed(_) | Self::PairingInterrupted)
    }
}

impl From<&str> for DiscoLightsError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for DiscoLightsError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
