pub mod controller;
pub mod gemini;

use tokio::sync::mpsc;

use crate::audio::codec::EncodedBlob;
use crate::error::PipelineError;

/// Connection parameters for the live voice endpoint. Audio-only responses
/// and bidirectional transcription are always requested.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
}

/// Events arriving from the remote peer over the live session.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Transcription of what the user said.
    InputTranscription(String),
    /// Transcription of what the model is saying.
    OutputTranscription(String),
    /// Inline base64 PCM audio chunk (24kHz mono).
    Audio { data: String },
    /// The model started a new response; all queued playback must stop now.
    Interrupted,
    /// Transport-level failure.
    Error(String),
    /// The server closed the session.
    Closed,
}

/// Narrow handle over the vendor's bidirectional connection. Send side only;
/// received traffic arrives on the event channel returned by the connector.
pub trait LiveSession: Send {
    /// Forward one encoded capture frame. Fire-and-forget: a frame sent into
    /// a closing session is dropped silently.
    fn send_realtime(&self, blob: EncodedBlob) -> Result<(), PipelineError>;

    /// Close the connection. Safe to call more than once.
    fn close(&mut self);
}

/// Factory seam so the pipeline can be exercised without a real network.
pub trait LiveConnector {
    fn connect(
        &self,
        config: &SessionConfig,
    ) -> impl std::future::Future<
        Output = Result<(Box<dyn LiveSession>, mpsc::Receiver<ServerEvent>), PipelineError>,
    > + Send;
}
