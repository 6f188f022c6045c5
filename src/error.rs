use thiserror::Error;

/// Failure classes for the voice pipeline. All are local: nothing here should
/// take down the host process.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The user or OS refused microphone access.
    #[error("microphone access denied")]
    DeviceDenied,

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Session transport failure (connect or mid-stream).
    #[error("connection error: {0}")]
    Transport(String),

    /// `start()` called while a session is already connecting or active.
    #[error("session already active")]
    AlreadyActive,

    #[error("audio decode failed: {0}")]
    Decode(String),
}
