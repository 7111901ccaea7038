//! Active-voice registry.
//!
//! Ten fixed slots, one per playable finger. A press shifts every slot one
//! position toward the tail and claims slot 0, so the newest voice always
//! wins and the oldest falls off at capacity. Slot order is the display
//! order (newest first) and the engine's mixing order.
//!
//! Phase accumulators and vibrato-bent step sizes live beside the slots as
//! plain atomics: the audio engine reads them every sample period without
//! taking the slot guard for longer than one snapshot copy.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::constants::{note_name, ACCUMULATORS};
use crate::notes;

/// One sounding note: base-table index plus octave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voice {
    /// Base-table note index, `0..12`.
    pub note: u8,
    /// Octave the note sounds in.
    pub octave: u8,
}

impl Voice {
    /// Voice for the given note index and octave.
    pub fn new(note: u8, octave: u8) -> Voice {
        Voice { note, octave }
    }

    /// Display label such as `A4`.
    pub fn label(&self) -> String {
        format!("{}{}", note_name(self.note), self.octave)
    }
}

/// Fixed-capacity registry of the voices currently sounding.
pub struct VoiceRegistry {
    slots: Mutex<[Option<Voice>; ACCUMULATORS]>,
    phases: [AtomicU32; ACCUMULATORS],
    bent_steps: [AtomicU32; ACCUMULATORS],
}

impl VoiceRegistry {
    /// Empty registry; all phases and bent steps start at zero.
    pub fn new() -> Self {
        VoiceRegistry {
            slots: Mutex::new([None; ACCUMULATORS]),
            phases: std::array::from_fn(|_| AtomicU32::new(0)),
            bent_steps: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    /// Starts a voice: shifts all slots toward the tail and claims slot 0.
    ///
    /// The oldest voice is evicted when the registry is full. Duplicate
    /// identities are allowed; each press occupies its own slot. Phases are
    /// not reset, the new voice picks up whatever phase its slot held.
    pub fn press(&self, voice: Voice) {
        let mut slots = self.slots.lock();
        for i in (1..ACCUMULATORS).rev() {
            slots[i] = slots[i - 1];
        }
        slots[0] = Some(voice);
    }

    /// Stops the first voice matching `voice` exactly.
    ///
    /// Later slots compact forward one position and the tail empties. An
    /// identity that is not sounding is a silent no-op; a release can
    /// legitimately arrive after its voice was evicted.
    pub fn release(&self, voice: Voice) {
        let mut slots = self.slots.lock();
        for i in 0..ACCUMULATORS {
            if slots[i] == Some(voice) {
                for j in i..ACCUMULATORS - 1 {
                    slots[j] = slots[j + 1];
                }
                slots[ACCUMULATORS - 1] = None;
                break;
            }
        }
    }

    /// Tear-free copy of the slot array, newest voice first.
    pub fn snapshot(&self) -> [Option<Voice>; ACCUMULATORS] {
        *self.slots.lock()
    }

    /// Recomputes every slot's bent step size from the joystick Y reading.
    ///
    /// Occupied slots get `bend(note, joystick_y)`, empty slots get 0. Runs
    /// under the slot guard so a concurrent press/release cannot interleave
    /// half-updated steps with a stale slot layout.
    pub fn apply_bend(&self, joystick_y: u16) {
        let slots = self.slots.lock();
        for (i, slot) in slots.iter().enumerate() {
            let step = match slot {
                Some(voice) => notes::bend(voice.note, joystick_y),
                None => 0,
            };
            self.bent_steps[i].store(step, Ordering::Relaxed);
        }
    }

    /// Current bent step size for a slot.
    #[inline]
    pub fn bent_step(&self, slot: usize) -> u32 {
        self.bent_steps[slot].load(Ordering::Relaxed)
    }

    /// Advances a slot's phase accumulator and returns the new phase.
    #[inline]
    pub fn advance_phase(&self, slot: usize, step: u32) -> u32 {
        self.phases[slot].fetch_add(step, Ordering::Relaxed).wrapping_add(step)
    }
}

impl Default for VoiceRegistry {
    fn default() -> Self {
        VoiceRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::JOYSTICK_CENTRE;
    use crate::notes::STEP_SIZES;

    #[test]
    fn test_press_claims_slot_zero_and_shifts() {
        let reg = VoiceRegistry::new();
        reg.press(Voice::new(0, 4));
        reg.press(Voice::new(5, 4));
        let slots = reg.snapshot();
        assert_eq!(slots[0], Some(Voice::new(5, 4)));
        assert_eq!(slots[1], Some(Voice::new(0, 4)));
        assert_eq!(slots[2], None);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let reg = VoiceRegistry::new();
        for note in 0..11u8 {
            reg.press(Voice::new(note, 4));
        }
        let slots = reg.snapshot();
        // Note 0 was pressed first and fell off the tail.
        assert_eq!(slots[0], Some(Voice::new(10, 4)));
        assert_eq!(slots[ACCUMULATORS - 1], Some(Voice::new(1, 4)));
        assert!(slots.iter().all(|s| s != &Some(Voice::new(0, 4))));
    }

    #[test]
    fn test_release_compacts_without_holes() {
        let reg = VoiceRegistry::new();
        reg.press(Voice::new(0, 4));
        reg.press(Voice::new(1, 4));
        reg.press(Voice::new(2, 4));
        reg.release(Voice::new(1, 4));
        let slots = reg.snapshot();
        assert_eq!(slots[0], Some(Voice::new(2, 4)));
        assert_eq!(slots[1], Some(Voice::new(0, 4)));
        assert_eq!(slots[2], None);
    }

    #[test]
    fn test_release_requires_exact_identity() {
        let reg = VoiceRegistry::new();
        reg.press(Voice::new(3, 4));
        reg.release(Voice::new(3, 5));
        assert_eq!(reg.snapshot()[0], Some(Voice::new(3, 4)));
    }

    #[test]
    fn test_release_of_absent_voice_is_noop() {
        let reg = VoiceRegistry::new();
        reg.press(Voice::new(3, 4));
        reg.release(Voice::new(7, 4));
        let slots = reg.snapshot();
        assert_eq!(slots[0], Some(Voice::new(3, 4)));
        assert_eq!(slots[1], None);
    }

    #[test]
    fn test_release_removes_first_duplicate_only() {
        let reg = VoiceRegistry::new();
        reg.press(Voice::new(3, 4));
        reg.press(Voice::new(3, 4));
        reg.release(Voice::new(3, 4));
        let slots = reg.snapshot();
        assert_eq!(slots[0], Some(Voice::new(3, 4)));
        assert_eq!(slots[1], None);
    }

    #[test]
    fn test_apply_bend_fills_occupied_and_clears_empty() {
        let reg = VoiceRegistry::new();
        reg.press(Voice::new(9, 4));
        reg.press(Voice::new(2, 5));
        reg.apply_bend(JOYSTICK_CENTRE);
        assert_eq!(reg.bent_step(0), STEP_SIZES[2]);
        assert_eq!(reg.bent_step(1), STEP_SIZES[9]);
        assert_eq!(reg.bent_step(2), 0);
    }

    #[test]
    fn test_bend_clears_after_release() {
        let reg = VoiceRegistry::new();
        reg.press(Voice::new(4, 4));
        reg.apply_bend(JOYSTICK_CENTRE);
        assert_eq!(reg.bent_step(0), STEP_SIZES[4]);
        reg.release(Voice::new(4, 4));
        reg.apply_bend(JOYSTICK_CENTRE);
        assert_eq!(reg.bent_step(0), 0);
    }

    #[test]
    fn test_phases_wrap_and_persist_across_identity_changes() {
        let reg = VoiceRegistry::new();
        let phase = reg.advance_phase(0, u32::MAX);
        assert_eq!(phase, u32::MAX);
        assert_eq!(reg.advance_phase(0, 1), 0);
        // A fresh press does not clear the slot's accumulated phase.
        reg.press(Voice::new(0, 4));
        assert_eq!(reg.advance_phase(0, 5), 5);
    }
}
