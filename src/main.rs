use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ringbuf::traits::Split;
use ringbuf::HeapRb;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cyberguard_voice::audio::capture::{FrameReader, MicCapture};
use cyberguard_voice::audio::codec::CAPTURE_FRAME_SAMPLES;
use cyberguard_voice::audio::playback::CpalSink;
use cyberguard_voice::config::Config;
use cyberguard_voice::error::PipelineError;
use cyberguard_voice::session::controller::{CaptureSource, SessionState, VoiceSession};
use cyberguard_voice::session::gemini::GeminiConnector;
use cyberguard_voice::session::ServerEvent;

/// Real microphone behind the controller's capture seam. Each `open` builds a
/// fresh ring and reader thread; `close` drops the stream to release the
/// device and raises the shutdown flag so the reader thread exits too.
struct CpalCapture {
    frame_tx: mpsc::Sender<Vec<f32>>,
    active: Option<MicCapture>,
    shutdown: Option<Arc<AtomicBool>>,
}

impl CpalCapture {
    fn new(frame_tx: mpsc::Sender<Vec<f32>>) -> Self {
        Self {
            frame_tx,
            active: None,
            shutdown: None,
        }
    }
}

impl CaptureSource for CpalCapture {
    fn open(&mut self) -> Result<(), PipelineError> {
        // Half a second of headroom over the frame size.
        let rb = HeapRb::<f32>::new(CAPTURE_FRAME_SAMPLES * 2);
        let (producer, consumer) = rb.split();
        let capture = MicCapture::new(producer)?;
        let tx = self.frame_tx.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let reader_shutdown = shutdown.clone();
        std::thread::spawn(move || FrameReader::new(consumer, tx, reader_shutdown).run());
        self.active = Some(capture);
        self.shutdown = Some(shutdown);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.store(true, Ordering::Relaxed);
        }
        self.active = None;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    tracing::info!("CyberGuard Voice Consultation starting...");

    let config = Config::from_env()?;

    let sink = CpalSink::new()?;
    let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<f32>>(16);
    let capture = CpalCapture::new(frame_tx);
    let mut session = VoiceSession::new(sink, capture);

    let connector = GeminiConnector::new(config.api_key.clone());
    let mut events = session.start(&connector, &config.live_session()).await?;

    tracing::info!("Listening. Press Ctrl+C to end the consultation.");

    let mut cadence = tokio::time::interval(Duration::from_millis(100));
    cadence.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match &event {
                    ServerEvent::InputTranscription(text) => println!("You: {}", text),
                    ServerEvent::OutputTranscription(text) => println!("Advisor: {}", text),
                    ServerEvent::Error(message) => {
                        eprintln!("Connection error. Check API key and internet: {}", message);
                    }
                    _ => {}
                }
                session.handle_event(event);
                if *session.state() != SessionState::Active {
                    break;
                }
            }
            frame = frame_rx.recv() => {
                if let Some(frame) = frame {
                    session.send_frame(&frame);
                }
            }
            _ = cadence.tick() => session.tick(),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, ending session");
                break;
            }
        }
    }

    session.stop();
    tracing::info!("Session closed.");
    Ok(())
}
