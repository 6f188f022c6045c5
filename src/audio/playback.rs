use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info};

use crate::audio::codec::{PlaybackBuffer, PLAYBACK_SAMPLE_RATE};
use crate::audio::scheduler::{AudioSink, SourceId};
use crate::error::PipelineError;

struct ScheduledSource {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
    pos: usize,
}

#[derive(Default)]
struct SinkState {
    frames_rendered: u64,
    next_id: u64,
    sources: Vec<ScheduledSource>,
    ended: Vec<SourceId>,
}

/// Output-device side of the scheduler: a 24kHz cpal stream whose clock is
/// the number of frames it has rendered. Scheduled sources begin at their
/// start frame and run sample-by-sample until exhausted.
pub struct CpalSink {
    state: Arc<Mutex<SinkState>>,
    _stream: cpal::Stream,
}

impl CpalSink {
    pub fn new() -> Result<Self, PipelineError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PipelineError::DeviceUnavailable("no output device".into()))?;

        info!("Audio Output Device: {}", device.name().unwrap_or_default());

        let supported = device
            .supported_output_configs()
            .map_err(|e| PipelineError::DeviceUnavailable(e.to_string()))?;

        let mut selected = None;
        for range in supported {
            if range.min_sample_rate().0 <= PLAYBACK_SAMPLE_RATE
                && range.max_sample_rate().0 >= PLAYBACK_SAMPLE_RATE
            {
                selected = Some(range.with_sample_rate(cpal::SampleRate(PLAYBACK_SAMPLE_RATE)));
                break;
            }
        }
        let config = selected.ok_or_else(|| {
            PipelineError::DeviceUnavailable(format!(
                "output device does not support {}Hz",
                PLAYBACK_SAMPLE_RATE
            ))
        })?;

        let channels = config.channels() as usize;
        info!(
            "Playback Config: Rate={}Hz, Channels={}",
            PLAYBACK_SAMPLE_RATE, channels
        );

        let state = Arc::new(Mutex::new(SinkState::default()));
        let cb_state = state.clone();

        let err_fn = |err| error!("an error occurred on playback stream: {}", err);

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device
                .build_output_stream(
                    &config.into(),
                    move |data: &mut [f32], _: &_| render(data, channels, &cb_state),
                    err_fn,
                    None,
                )
                .map_err(|e| PipelineError::DeviceUnavailable(e.to_string()))?,
            other => {
                return Err(PipelineError::DeviceUnavailable(format!(
                    "unsupported output sample format {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| PipelineError::DeviceUnavailable(e.to_string()))?;

        Ok(Self {
            state,
            _stream: stream,
        })
    }
}

/// Mix every due source into the device buffer and advance the clock.
fn render(data: &mut [f32], channels: usize, state: &Arc<Mutex<SinkState>>) {
    let mut state = match state.lock() {
        Ok(s) => s,
        Err(_) => return,
    };

    let frames = data.len() / channels;
    for frame_idx in 0..frames {
        let clock = state.frames_rendered + frame_idx as u64;
        let mut mixed = 0.0f32;
        for source in state.sources.iter_mut() {
            if clock >= source.start_frame && source.pos < source.samples.len() {
                mixed += source.samples[source.pos];
                source.pos += 1;
            }
        }
        for ch in 0..channels {
            data[frame_idx * channels + ch] = mixed;
        }
    }
    state.frames_rendered += frames as u64;

    // Retire exhausted sources.
    let mut i = 0;
    while i < state.sources.len() {
        if state.sources[i].pos >= state.sources[i].samples.len() {
            let src = state.sources.swap_remove(i);
            state.ended.push(src.id);
        } else {
            i += 1;
        }
    }
}

/// Average a decoded buffer down to the mono samples the device plays.
fn downmix(buffer: &PlaybackBuffer) -> Vec<f32> {
    let frames = buffer.frame_count();
    let channels = buffer.channels.len().max(1);
    let mut mono = Vec::with_capacity(frames);
    for i in 0..frames {
        let sum: f32 = buffer.channels.iter().map(|c| c[i]).sum();
        mono.push(sum / channels as f32);
    }
    mono
}

impl AudioSink for CpalSink {
    fn current_time(&self) -> f64 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.frames_rendered as f64 / PLAYBACK_SAMPLE_RATE as f64
    }

    fn start(&mut self, buffer: PlaybackBuffer, at: f64) -> SourceId {
        let samples = downmix(&buffer);
        let start_frame = (at * PLAYBACK_SAMPLE_RATE as f64).round() as u64;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let id = SourceId(state.next_id);
        state.next_id += 1;
        state.sources.push(ScheduledSource {
            id,
            start_frame,
            samples,
            pos: 0,
        });
        id
    }

    fn stop(&mut self, id: SourceId) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.sources.retain(|s| s.id != id);
    }

    fn take_ended(&mut self) -> Vec<SourceId> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut state.ended)
    }
}
