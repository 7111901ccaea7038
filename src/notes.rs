//! Step-size table and pitch arithmetic.
//!
//! A voice advances its 32-bit phase accumulator by a fixed *step size* each
//! sample period; the step size encodes the note's frequency at the current
//! sample rate. The table below covers the twelve semitones of the reference
//! octave. Other octaves are reached by bit-shifting the base entry, and the
//! joystick bends pitches by interpolating between table entries.

use crate::constants::{JOYSTICK_CENTRE, NOTES_PER_OCTAVE, REFERENCE_OCTAVE};

/// Per-semitone phase increments for the reference octave.
///
/// Entry `i` equals `floor(2^32 / SAMPLE_RATE) * floor(FREQ_A * 2^((i - INDEX_A) / 12))`,
/// so entry [`crate::constants::INDEX_A`] lands exactly on 440 Hz. Both
/// factors are truncated to integers before multiplying, matching the
/// fixed-point hardware tables.
pub const STEP_SIZES: [u32; NOTES_PER_OCTAVE] = [
    48_025_350, // 246 Hz
    50_953_725, // 261 Hz
    54_077_325, // 277 Hz
    57_200_925, // 293 Hz
    60_714_975, // 311 Hz
    64_229_025, // 329 Hz
    68_133_525, // 349 Hz
    72_038_025, // 369 Hz
    76_332_975, // 391 Hz
    81_018_375, // 415 Hz
    85_899_000, // 440 Hz
    90_974_850, // 466 Hz
];

/// Shifts a base-table step size into the target octave.
///
/// Octave [`REFERENCE_OCTAVE`] is the identity. Higher octaves double the
/// step per octave (left shift), lower octaves halve it. Always transpose
/// from the base table; composing transpositions loses the truncated bits.
#[inline]
pub fn transpose(step: u32, octave: u8) -> u32 {
    if octave > REFERENCE_OCTAVE {
        step << (octave - REFERENCE_OCTAVE)
    } else {
        step >> (REFERENCE_OCTAVE - octave)
    }
}

/// Bends a note's step size by the joystick Y reading (whole-tone range).
///
/// `joystick_y` is a raw 10-bit ADC value centred on [`JOYSTICK_CENTRE`].
/// Pushing up interpolates linearly towards the step two semitones above,
/// pulling down towards two semitones below. At the table edges the missing
/// neighbour is borrowed from the adjacent octave: the bottom two notes bend
/// down into the halved top of the table, the top two bend up into the
/// doubled bottom.
///
/// `note` must be a base-table index (`< 12`); the wire codec rejects frames
/// that would violate this.
pub fn bend(note: u8, joystick_y: u16) -> u32 {
    debug_assert!((note as usize) < NOTES_PER_OCTAVE);
    let n = note as usize;
    let this = STEP_SIZES[n];

    let (above, below) = if n <= 1 {
        (STEP_SIZES[n + 2], STEP_SIZES[n + 10] / 2)
    } else if n >= 10 {
        (STEP_SIZES[n - 10] * 2, STEP_SIZES[n - 2])
    } else {
        (STEP_SIZES[n + 2], STEP_SIZES[n - 2])
    };

    let dy = (joystick_y as i32 - JOYSTICK_CENTRE as i32) as f64;
    let bent = if dy > 0.0 {
        this as f64 + (dy / 512.0) * (above as f64 - this as f64)
    } else {
        this as f64 + (dy / 512.0) * (this as f64 - below as f64)
    };
    bent as u32
}
