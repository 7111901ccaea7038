//! Fixed protocol and synthesis parameters shared across the firmware core.
//!
//! Everything tunable at build time lives here: sample rate, voice count,
//! tuning reference, octave range, bus geometry and queue depths. Runtime
//! timing (scan cadence, debounce windows) is configured per unit through
//! [`crate::unit::TimingProfile`] instead, so tests can run fast.

/// Audio sample rate in Hz.
///
/// Every step size in [`crate::notes::STEP_SIZES`] is derived from this
/// rate; changing it requires regenerating the table.
pub const SAMPLE_RATE: u32 = 22_000;

/// Number of simultaneous voices (phase accumulators) per Receiver.
pub const ACCUMULATORS: usize = 10;

/// Notes per octave, one key per note on each unit.
pub const NOTES_PER_OCTAVE: usize = 12;

/// Tuning reference frequency in Hz (concert A).
pub const FREQ_A: f64 = 440.0;

/// Index of the 440 Hz reference entry within [`crate::notes::STEP_SIZES`].
///
/// The table is anchored so entry 10 carries the reference frequency, which
/// places entry 0 a major seventh below it.
pub const INDEX_A: usize = 10;

/// Octave that carries the tuning reference and the Receiver role.
pub const REFERENCE_OCTAVE: u8 = 4;

/// Lowest assignable octave.
pub const OCTAVE_MIN: u8 = 1;

/// Highest assignable octave.
pub const OCTAVE_MAX: u8 = 7;

/// Maximum volume setting. Volume scales the mix by `>> (VOLUME_MAX - v)`.
pub const VOLUME_MAX: u8 = 8;

/// Number of selectable waveforms (saw, sine, square, triangle).
pub const WAVEFORM_COUNT: u8 = 4;

/// Joystick rest position on the 10-bit ADC scale. Readings above bend up,
/// below bend down.
pub const JOYSTICK_CENTRE: u16 = 512;

/// Shared bus arbitration address used by every unit in the chain.
pub const BUS_ADDRESS: u32 = 0x123;

/// Payload size of one bus frame in bytes.
pub const FRAME_LEN: usize = 8;

/// Depth of the outbound frame queue and of each voice-event lane.
pub const QUEUE_CAPACITY: usize = 36;

/// Number of in-flight transmit slots on the bus controller.
pub const TX_PERMITS: usize = 3;

/// Note names indexed by key position within an octave.
pub const NOTE_NAMES: [&str; NOTES_PER_OCTAVE] = [
    "C", "C#", "D", "Eb", "E", "F", "F#", "G", "G#", "A", "Bb", "B",
];

/// Returns the display name for a note index, or `"?"` when out of range.
#[inline]
pub fn note_name(note: u8) -> &'static str {
    NOTE_NAMES.get(note as usize).copied().unwrap_or("?")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_names_cover_one_octave() {
        assert_eq!(NOTE_NAMES.len(), NOTES_PER_OCTAVE);
        assert_eq!(NOTE_NAMES[0], "C");
        assert_eq!(NOTE_NAMES[9], "A");
        assert_eq!(NOTE_NAMES[NOTES_PER_OCTAVE - 1], "B");
    }

    #[test]
    fn test_note_name_out_of_range() {
        assert_eq!(note_name(9), "A");
        assert_eq!(note_name(12), "?");
        assert_eq!(note_name(255), "?");
    }

    #[test]
    fn test_octave_range_contains_reference() {
        assert!(OCTAVE_MIN <= REFERENCE_OCTAVE);
        assert!(REFERENCE_OCTAVE <= OCTAVE_MAX);
    }

    #[test]
    fn test_queue_sized_for_full_chain_burst() {
        // Seven units sounding at once can each contribute a handful of
        // frames per scan tick; 36 entries rides out the burst.
        assert!(QUEUE_CAPACITY >= (OCTAVE_MAX - OCTAVE_MIN + 1) as usize * 4);
    }
}
