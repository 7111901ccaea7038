//! Bounded FIFO of rendered samples between the pump and the device.
//!
//! The producer thread and the rodio source share one buffer behind a
//! `parking_lot::Mutex`, so the buffer itself stays a plain sequential
//! structure. Counters grow without bound and are reduced modulo the
//! power-of-two capacity only when indexing, which keeps full and empty
//! distinguishable without reserving a slot.

use crate::{Result, SynthError};

// Caps the rounded-up allocation at 16 Mi samples (64 MB of f32).
const MAX_SAMPLES: usize = 16 * 1024 * 1024;

/// Fixed-capacity sample FIFO with wrap-around storage.
#[derive(Debug)]
pub struct RingBuffer {
    store: Vec<f32>,
    produced: usize,
    consumed: usize,
}

impl RingBuffer {
    /// Buffer holding at least `requested` samples, rounded up to a power
    /// of two.
    pub fn new(requested: usize) -> Result<Self> {
        if requested == 0 {
            return Err(SynthError::ConfigError(
                "sample buffer capacity must be greater than 0".into(),
            ));
        }
        let capacity = requested.next_power_of_two();
        if capacity > MAX_SAMPLES {
            return Err(SynthError::ConfigError(format!(
                "sample buffer capacity {capacity} exceeds maximum {MAX_SAMPLES}"
            )));
        }
        Ok(RingBuffer {
            store: vec![0.0; capacity],
            produced: 0,
            consumed: 0,
        })
    }

    /// Samples queued for the consumer.
    pub fn len(&self) -> usize {
        // Wrapping subtraction stays exact across counter overflow, as
        // the capacity divides the counter modulus.
        self.produced.wrapping_sub(self.consumed)
    }

    /// True when no samples are queued.
    pub fn is_empty(&self) -> bool {
        self.produced == self.consumed
    }

    /// Slots still open for the producer.
    pub fn free(&self) -> usize {
        self.store.len() - self.len()
    }

    /// Appends as many of `samples` as fit, returning how many did.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let count = samples.len().min(self.free());
        let start = self.produced & (self.store.len() - 1);
        let head = count.min(self.store.len() - start);
        self.store[start..start + head].copy_from_slice(&samples[..head]);
        self.store[..count - head].copy_from_slice(&samples[head..count]);
        self.produced = self.produced.wrapping_add(count);
        count
    }

    /// Pops up to `dest.len()` samples in FIFO order, returning how many
    /// were copied.
    pub fn read(&mut self, dest: &mut [f32]) -> usize {
        let count = dest.len().min(self.len());
        let start = self.consumed & (self.store.len() - 1);
        let head = count.min(self.store.len() - start);
        dest[..head].copy_from_slice(&self.store[start..start + head]);
        dest[head..count].copy_from_slice(&self.store[..count - head]);
        self.consumed = self.consumed.wrapping_add(count);
        count
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.store.len()
    }
}
