use std::collections::VecDeque;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::audio::codec::{decode_frames, encode_frame, PLAYBACK_SAMPLE_RATE};
use crate::audio::scheduler::{AudioSink, PlaybackScheduler};
use crate::error::PipelineError;
use crate::session::{LiveConnector, LiveSession, ServerEvent, SessionConfig};

/// How many transcript lines are kept for display.
const TRANSCRIPT_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Closed,
    Connecting,
    Active,
    Errored(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Advisor,
}

#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
}

/// Bounded rolling log of the most recent transcription lines. Display-only;
/// the audio pipeline does not depend on it.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: VecDeque<TranscriptEntry>,
}

impl Transcript {
    fn push(&mut self, speaker: Speaker, text: String) {
        self.entries.push_back(TranscriptEntry { speaker, text });
        while self.entries.len() > TRANSCRIPT_CAPACITY {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Seam over the microphone device so lifecycle rules are testable without
/// real hardware. The cpal implementation lives in the driver.
pub trait CaptureSource {
    /// Acquire the device. Refusal surfaces as `DeviceDenied`.
    fn open(&mut self) -> Result<(), PipelineError>;
    /// Release the device. Safe to call when not open.
    fn close(&mut self);
}

/// Owns the capture device, the playback scheduler and the live session
/// handle as one unit, so no start/stop path can leave a device half-open.
pub struct VoiceSession<S: AudioSink, P: CaptureSource> {
    state: SessionState,
    scheduler: PlaybackScheduler<S>,
    transcript: Transcript,
    session: Option<Box<dyn LiveSession>>,
    capture: P,
}

impl<S: AudioSink, P: CaptureSource> VoiceSession<S, P> {
    pub fn new(sink: S, capture: P) -> Self {
        Self {
            state: SessionState::Closed,
            scheduler: PlaybackScheduler::new(sink),
            transcript: Transcript::default(),
            session: None,
            capture,
        }
    }

    /// Bring the whole pipeline up: microphone first, then the session.
    /// Either failure tears down everything acquired so far; a failed start
    /// never leaves an open microphone behind.
    pub async fn start<C: LiveConnector>(
        &mut self,
        connector: &C,
        config: &SessionConfig,
    ) -> Result<mpsc::Receiver<ServerEvent>, PipelineError> {
        match self.state {
            SessionState::Closed | SessionState::Errored(_) => {}
            _ => return Err(PipelineError::AlreadyActive),
        }
        self.state = SessionState::Connecting;

        if let Err(e) = self.capture.open() {
            self.state = SessionState::Errored(e.to_string());
            return Err(e);
        }

        match connector.connect(config).await {
            Ok((session, events)) => {
                self.session = Some(session);
                self.state = SessionState::Active;
                info!("Voice session active");
                Ok(events)
            }
            Err(e) => {
                self.capture.close();
                self.state = SessionState::Errored(e.to_string());
                Err(e)
            }
        }
    }

    /// Encode one captured frame and forward it. No backpressure: frames sent
    /// while the session is down are dropped.
    pub fn send_frame(&self, samples: &[f32]) {
        if self.state != SessionState::Active {
            return;
        }
        if let Some(session) = &self.session {
            let _ = session.send_realtime(encode_frame(samples));
        }
    }

    /// Apply one server event. Each event fully updates scheduler state
    /// before control returns.
    pub fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::InputTranscription(text) => {
                self.transcript.push(Speaker::User, text);
            }
            ServerEvent::OutputTranscription(text) => {
                self.transcript.push(Speaker::Advisor, text);
            }
            ServerEvent::Audio { data } => {
                match decode_frames(&data, PLAYBACK_SAMPLE_RATE, 1) {
                    Ok(buffer) => {
                        self.scheduler.enqueue(buffer);
                    }
                    Err(e) => warn!("Dropping undecodable audio chunk: {}", e),
                }
            }
            ServerEvent::Interrupted => self.scheduler.interrupt(),
            ServerEvent::Error(message) => {
                warn!("Session transport error: {}", message);
                self.teardown();
                self.state = SessionState::Errored(message);
            }
            ServerEvent::Closed => self.stop(),
        }
    }

    /// Release playback buffers that finished naturally. Called from the
    /// driver loop.
    pub fn tick(&mut self) {
        self.scheduler.reap_ended();
    }

    /// Shut everything down. Idempotent from any state.
    pub fn stop(&mut self) {
        self.teardown();
        self.state = SessionState::Closed;
    }

    fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.capture.close();
        self.scheduler.clear();
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn scheduler(&self) -> &PlaybackScheduler<S> {
        &self.scheduler
    }
}
