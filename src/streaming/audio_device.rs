//! System audio output through rodio.
//!
//! The device owns a rodio sink fed by a source that drains the shared
//! [`RingBuffer`]. An underrun plays silence rather than ending the
//! stream, since the synth produces sound only while keys are down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rodio::{OutputStream, Sink, Source};

use super::{RingBuffer, StreamConfig};
use crate::{Result, SynthError};

/// Rodio source pulling from the ring buffer in batches.
struct RingSource {
    ring: Arc<Mutex<RingBuffer>>,
    config: StreamConfig,
    finished: Arc<AtomicBool>,
    batch: Vec<f32>,
    batch_pos: usize,
}

impl RingSource {
    fn new(ring: Arc<Mutex<RingBuffer>>, config: StreamConfig, finished: Arc<AtomicBool>) -> Self {
        let batch_len = 1024;
        RingSource {
            ring,
            config,
            finished,
            batch: vec![0.0; batch_len],
            // Start exhausted so the first pull fetches a batch.
            batch_pos: batch_len,
        }
    }
}

impl Iterator for RingSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.finished.load(Ordering::Relaxed) {
            return None;
        }

        if self.batch_pos >= self.batch.len() {
            let read = self.ring.lock().read(&mut self.batch);
            self.batch_pos = 0;
            if read < self.batch.len() {
                // Underrun: pad with silence, keeping the stream alive.
                self.batch[read..].fill(0.0);
            }
        }

        let sample = self.batch[self.batch_pos];
        self.batch_pos += 1;
        Some(sample)
    }
}

impl Source for RingSource {
    fn current_frame_len(&self) -> Option<usize> {
        let queued = self.ring.lock().len();
        if queued > 0 {
            Some(queued)
        } else {
            Some(self.batch.len())
        }
    }

    fn channels(&self) -> u16 {
        self.config.channels
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// System audio playback of the unit's sample stream.
pub struct AudioDevice {
    _stream: OutputStream,
    sink: Sink,
    finished: Arc<AtomicBool>,
}

impl AudioDevice {
    /// Opens the default output device and starts draining `ring`.
    pub fn new(config: &StreamConfig, ring: Arc<Mutex<RingBuffer>>) -> Result<Self> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| SynthError::AudioDeviceError(format!("no output stream: {e}")))?;
        let sink = Sink::try_new(&handle)
            .map_err(|e| SynthError::AudioDeviceError(format!("no sink: {e}")))?;

        let finished = Arc::new(AtomicBool::new(false));
        sink.append(RingSource::new(ring, *config, Arc::clone(&finished)));

        Ok(AudioDevice {
            _stream: stream,
            sink,
            finished,
        })
    }

    /// Pauses output.
    pub fn pause(&self) {
        self.sink.pause();
    }

    /// Resumes output.
    pub fn play(&self) {
        self.sink.play();
    }

    /// Ends the stream; the source stops instead of playing silence forever.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }

    /// Blocks until the sink has drained.
    pub fn wait_for_finish(&self) {
        self.sink.sleep_until_end();
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        self.pause();
        self.finished.store(true, Ordering::Relaxed);
    }
}
