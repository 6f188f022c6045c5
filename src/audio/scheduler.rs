use std::collections::HashSet;

use tracing::debug;

use crate::audio::codec::PlaybackBuffer;

/// Handle for one scheduled buffer on the output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub u64);

/// Seam over the output device. The real implementation is the cpal sink;
/// tests drive the scheduler with a manual clock.
pub trait AudioSink {
    /// Current position of the output clock, in seconds. Monotonic.
    fn current_time(&self) -> f64;

    /// Schedule `buffer` to begin playing at clock time `at`.
    fn start(&mut self, buffer: PlaybackBuffer, at: f64) -> SourceId;

    /// Force-stop a scheduled or playing source immediately.
    fn stop(&mut self, id: SourceId);

    /// Drain the sources that finished playing naturally since the last call.
    fn take_ended(&mut self) -> Vec<SourceId>;
}

/// Serializes decoded buffers into gapless, non-overlapping output.
///
/// A single monotonic cursor marks where the next buffer begins; each arrival
/// is scheduled exactly there and advances the cursor by its own duration.
/// Arrival order is playback order; the transport delivers chunks in send
/// order so no reordering happens here. A buffer arriving after the cursor
/// has fallen behind the device clock starts immediately (audible gap, not
/// recovered).
pub struct PlaybackScheduler<S: AudioSink> {
    sink: S,
    next_start_time: f64,
    active: HashSet<SourceId>,
}

impl<S: AudioSink> PlaybackScheduler<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            next_start_time: 0.0,
            active: HashSet::new(),
        }
    }

    /// Schedule a decoded buffer back-to-back with whatever is already queued.
    pub fn enqueue(&mut self, buffer: PlaybackBuffer) -> SourceId {
        let duration = buffer.duration();
        self.next_start_time = self.next_start_time.max(self.sink.current_time());
        let id = self.sink.start(buffer, self.next_start_time);
        self.active.insert(id);
        self.next_start_time += duration;
        id
    }

    /// Release buffers that completed playback without interruption.
    pub fn reap_ended(&mut self) {
        for id in self.sink.take_ended() {
            self.active.remove(&id);
        }
    }

    /// Server-signaled interruption: kill everything queued or playing and
    /// reset the cursor so the next buffer starts fresh.
    pub fn interrupt(&mut self) {
        debug!("playback interrupted, stopping {} active buffers", self.active.len());
        for id in self.active.drain() {
            self.sink.stop(id);
        }
        self.next_start_time = 0.0;
    }

    /// Session close: identical teardown to an interrupt. The sink itself
    /// releases device resources on drop.
    pub fn clear(&mut self) {
        for id in self.active.drain() {
            self.sink.stop(id);
        }
        self.next_start_time = 0.0;
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}
