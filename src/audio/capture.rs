use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::{Consumer, Producer};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::audio::codec::{CAPTURE_FRAME_SAMPLES, CAPTURE_SAMPLE_RATE};
use crate::error::PipelineError;

/// Microphone capture at a fixed 16kHz mono. The rate is a contract with the
/// transport (`audio/pcm;rate=16000`), not negotiated with the device.
pub struct MicCapture {
    _stream: cpal::Stream,
}

impl MicCapture {
    pub fn new<P>(mut producer: P) -> Result<Self, PipelineError>
    where
        P: Producer<Item = f32> + Send + 'static,
    {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(PipelineError::DeviceDenied)?;

        info!("Audio Input Device: {}", device.name().unwrap_or_default());

        let supported = device
            .supported_input_configs()
            .map_err(|e| PipelineError::DeviceUnavailable(e.to_string()))?;

        let mut selected = None;
        for range in supported {
            if range.min_sample_rate().0 <= CAPTURE_SAMPLE_RATE
                && range.max_sample_rate().0 >= CAPTURE_SAMPLE_RATE
            {
                selected = Some(range.with_sample_rate(cpal::SampleRate(CAPTURE_SAMPLE_RATE)));
                break;
            }
        }
        let config = selected.ok_or_else(|| {
            PipelineError::DeviceUnavailable(format!(
                "input device does not support {}Hz",
                CAPTURE_SAMPLE_RATE
            ))
        })?;

        info!(
            "Capture Config: Rate={}Hz, Channels={}",
            CAPTURE_SAMPLE_RATE,
            config.channels()
        );
        let channels = config.channels() as usize;

        let err_fn = |err| error!("an error occurred on capture stream: {}", err);

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device
                .build_input_stream(
                    &config.into(),
                    move |data: &[f32], _: &_| write_input_data(data, channels, &mut producer),
                    err_fn,
                    None,
                )
                .map_err(map_build_error)?,
            cpal::SampleFormat::I16 => device
                .build_input_stream(
                    &config.into(),
                    move |data: &[i16], _: &_| write_input_data_i16(data, channels, &mut producer),
                    err_fn,
                    None,
                )
                .map_err(map_build_error)?,
            other => {
                return Err(PipelineError::DeviceUnavailable(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| PipelineError::DeviceUnavailable(e.to_string()))?;

        Ok(Self { _stream: stream })
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> PipelineError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => PipelineError::DeviceDenied,
        other => PipelineError::DeviceUnavailable(other.to_string()),
    }
}

fn write_input_data<P>(input: &[f32], channels: usize, producer: &mut P)
where
    P: Producer<Item = f32>,
{
    // Keep channel 0 only; the transport is mono. If the ring is full the
    // samples are dropped (lossy).
    if channels <= 1 {
        producer.push_slice(input);
    } else {
        for frame in input.chunks(channels) {
            let _ = producer.try_push(frame[0]);
        }
    }
}

fn write_input_data_i16<P>(input: &[i16], channels: usize, producer: &mut P)
where
    P: Producer<Item = f32>,
{
    for frame in input.chunks(channels) {
        let sample = frame[0] as f32 / i16::MAX as f32;
        let _ = producer.try_push(sample);
    }
}

/// Pops fixed-size frames off the capture ring and forwards them to the
/// session driver. Runs on its own blocking thread until the session owner
/// raises the shutdown flag or the driver side hangs up; without the flag a
/// stopped session would strand the thread polling an idle ring.
pub struct FrameReader<C>
where
    C: Consumer<Item = f32> + Send,
{
    consumer: C,
    tx: mpsc::Sender<Vec<f32>>,
    shutdown: Arc<AtomicBool>,
}

impl<C> FrameReader<C>
where
    C: Consumer<Item = f32> + Send,
{
    pub fn new(consumer: C, tx: mpsc::Sender<Vec<f32>>, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            consumer,
            tx,
            shutdown,
        }
    }

    pub fn run(mut self) {
        info!(
            "Frame Reader Started. Frame size: {} samples",
            CAPTURE_FRAME_SAMPLES
        );
        let mut frame = vec![0.0f32; CAPTURE_FRAME_SAMPLES];

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Capture reader shut down");
                return;
            }

            // Wait for a whole frame; partial frames stay in the ring.
            if self.consumer.occupied_len() < CAPTURE_FRAME_SAMPLES {
                std::thread::sleep(std::time::Duration::from_millis(10));
                continue;
            }

            let _ = self.consumer.pop_slice(&mut frame);

            if self.tx.blocking_send(frame.clone()).is_err() {
                // Driver side hung up; the session is over.
                warn!("Frame channel closed, stopping capture reader");
                return;
            }
        }
    }
}
