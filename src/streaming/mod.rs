//! Audio output and streaming.
//!
//! The engine renders on a producer thread into a [`RingBuffer`]; rodio
//! drains it on the audio callback side through [`AudioDevice`]. Memory
//! stays bounded by the ring regardless of how long the synth runs.

pub mod audio_device;
pub mod ring_buffer;

pub use audio_device::AudioDevice;
pub use ring_buffer::RingBuffer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::constants::SAMPLE_RATE;
use crate::engine::AudioEngine;

/// Producer backoff while the ring buffer is full.
const BACKOFF: Duration = Duration::from_micros(500);

/// Render chunk size in samples.
const CHUNK: usize = 256;

/// Shape of the output stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Ring buffer size in samples. Bigger buffers ride out scheduling
    /// hiccups at the cost of latency.
    pub ring_buffer_size: usize,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Output channel count.
    pub channels: u16,
}

impl StreamConfig {
    /// Roughly 93 ms of buffer at the synth rate.
    pub fn low_latency() -> Self {
        StreamConfig {
            ring_buffer_size: 2048,
            sample_rate: SAMPLE_RATE,
            channels: 1,
        }
    }

    /// Roughly 372 ms of buffer at the synth rate.
    pub fn stable() -> Self {
        StreamConfig {
            ring_buffer_size: 8192,
            sample_rate: SAMPLE_RATE,
            channels: 1,
        }
    }

    /// Buffer latency in milliseconds.
    pub fn latency_ms(&self) -> f32 {
        (self.ring_buffer_size as f32) / (self.sample_rate as f32) * 1000.0
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig::stable()
    }
}

/// Maps the engine's unsigned 8-bit output onto [-1.0, 1.0).
#[inline]
fn to_f32(sample: u8) -> f32 {
    (sample as f32 - 128.0) / 128.0
}

/// Producer loop: renders the engine into `ring` until `running` clears.
///
/// Backed off rather than busy when the ring is full, so the producer
/// tracks the audio callback's pace.
pub fn pump_engine(engine: &AudioEngine, ring: &Arc<Mutex<RingBuffer>>, running: &AtomicBool) {
    let mut raw = [0u8; CHUNK];
    let mut converted = [0f32; CHUNK];

    while running.load(Ordering::Relaxed) {
        engine.fill(&mut raw);
        for (dst, &src) in converted.iter_mut().zip(raw.iter()) {
            *dst = to_f32(src);
        }
        let mut offset = 0;
        while offset < CHUNK {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            let written = ring.lock().write(&converted[offset..]);
            if written == 0 {
                std::thread::sleep(BACKOFF);
                continue;
            }
            offset += written;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::UnitState;
    use crate::voices::{Voice, VoiceRegistry};

    #[test]
    fn test_latency_follows_the_buffer_size() {
        let low = StreamConfig::low_latency();
        let stable = StreamConfig::stable();
        assert!(low.latency_ms() < stable.latency_ms());
        assert!(stable.latency_ms() > 300.0);
        assert_eq!(low.sample_rate, SAMPLE_RATE);
    }

    #[test]
    fn test_sample_conversion_maps_the_full_byte_range() {
        assert_eq!(to_f32(128), 0.0);
        assert_eq!(to_f32(0), -1.0);
        assert!(to_f32(255) > 0.99);
        assert!(to_f32(64) < 0.0);
    }

    #[test]
    fn test_pump_renders_until_stopped() {
        let state = Arc::new(UnitState::new());
        state.set_volume(8);
        let voices = Arc::new(VoiceRegistry::new());
        voices.press(Voice::new(9, 4));
        voices.apply_bend(512);
        let engine = AudioEngine::new(Arc::clone(&voices), state);

        let ring = Arc::new(Mutex::new(RingBuffer::new(1024).unwrap()));
        let running = Arc::new(AtomicBool::new(true));
        let pump_ring = Arc::clone(&ring);
        let pump_running = Arc::clone(&running);
        let join = std::thread::spawn(move || {
            pump_engine(&engine, &pump_ring, &pump_running);
        });

        // The pump fills the ring, then parks on the full buffer.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while ring.lock().len() < CHUNK {
            assert!(std::time::Instant::now() < deadline, "pump produced nothing");
            std::thread::sleep(Duration::from_millis(1));
        }

        running.store(false, Ordering::Relaxed);
        join.join().unwrap();

        let mut out = vec![0.0f32; CHUNK];
        let read = ring.lock().read(&mut out);
        assert_eq!(read, CHUNK);
        // A pressed key at full volume is not silence.
        assert!(out.iter().any(|&s| s != 0.0));
    }
}
