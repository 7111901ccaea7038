//! Waveform generators.
//!
//! Each generator is a pure function of the *scaled phase*: the top 8 bits
//! of a 32-bit phase accumulator re-centred to `[-128, 127]`. Outputs span
//! the same signed byte range and are mixed and biased by the audio engine.

/// Selectable output waveform.
///
/// The discriminants match the wire encoding used by `WaveformChange`
/// frames and the waveform knob position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Waveform {
    /// Linear ramp over the full phase range.
    Sawtooth = 0,
    /// Table-driven sine.
    Sine = 1,
    /// Hard switch at mid-phase.
    Square = 2,
    /// Symmetric rise and fall.
    Triangle = 3,
}

impl Waveform {
    /// Maps a knob position or wire byte onto a waveform, if in range.
    pub fn from_index(index: u8) -> Option<Waveform> {
        match index {
            0 => Some(Waveform::Sawtooth),
            1 => Some(Waveform::Sine),
            2 => Some(Waveform::Square),
            3 => Some(Waveform::Triangle),
            _ => None,
        }
    }

    /// Wire byte / knob position for this waveform.
    #[inline]
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Display label.
    pub fn name(self) -> &'static str {
        match self {
            Waveform::Sawtooth => "Sawtooth",
            Waveform::Sine => "Sine",
            Waveform::Square => "Square",
            Waveform::Triangle => "Triangle",
        }
    }
}

impl Default for Waveform {
    fn default() -> Self {
        Waveform::Sawtooth
    }
}

/// Quarter-rounded sine samples over one full cycle, signed byte range.
const SINE_LUT: [i32; 256] = [
    0, 3, 6, 9, 12, 16, 19, 22, 25, 28, //
    31, 34, 37, 40, 43, 46, 49, 51, 54, 57, //
    60, 63, 65, 68, 71, 73, 76, 78, 81, 83, //
    85, 88, 90, 92, 94, 96, 98, 100, 102, 104, //
    106, 107, 109, 111, 112, 113, 115, 116, 117, 118, //
    120, 121, 122, 122, 123, 124, 125, 125, 126, 126, //
    126, 127, 127, 127, 127, 127, 127, 127, 126, 126, //
    126, 125, 125, 124, 123, 122, 122, 121, 120, 118, //
    117, 116, 115, 113, 112, 111, 109, 107, 106, 104, //
    102, 100, 98, 96, 94, 92, 90, 88, 85, 83, //
    81, 78, 76, 73, 71, 68, 65, 63, 60, 57, //
    54, 51, 49, 46, 43, 40, 37, 34, 31, 28, //
    25, 22, 19, 16, 12, 9, 6, 3, 0, -3, //
    -6, -9, -12, -16, -19, -22, -25, -28, -31, -34, //
    -37, -40, -43, -46, -49, -51, -54, -57, -60, -63, //
    -65, -68, -71, -73, -76, -78, -81, -83, -85, -88, //
    -90, -92, -94, -96, -98, -100, -102, -104, -106, -107, //
    -109, -111, -112, -113, -115, -116, -117, -118, -120, -121, //
    -122, -122, -123, -124, -125, -125, -126, -126, -126, -127, //
    -127, -127, -127, -127, -127, -127, -126, -126, -126, -125, //
    -125, -124, -123, -122, -122, -121, -120, -118, -117, -116, //
    -115, -113, -112, -111, -109, -107, -106, -104, -102, -100, //
    -98, -96, -94, -92, -90, -88, -85, -83, -81, -78, //
    -76, -73, -71, -68, -65, -63, -60, -57, -54, -51, //
    -49, -46, -43, -40, -37, -34, -31, -28, -25, -22, //
    -19, -16, -12, -9, -6, -3, //
];

#[inline]
fn sawtooth(scaled: i32) -> i32 {
    scaled
}

#[inline]
fn sine(scaled: i32) -> i32 {
    SINE_LUT[(scaled + 128) as usize]
}

#[inline]
fn square(scaled: i32) -> i32 {
    if scaled < 0 {
        -128
    } else {
        127
    }
}

#[inline]
fn triangle(scaled: i32) -> i32 {
    // The raw ramp peaks at 128 for scaled == 0; saturate to keep the
    // output within the signed byte range.
    let v = if scaled <= 0 {
        2 * (scaled + 64)
    } else {
        2 * (64 - scaled)
    };
    v.min(127)
}

/// Produces one waveform sample from a phase accumulator value.
///
/// The accumulator's top 8 bits are re-centred to `[-128, 127]` and fed to
/// the selected generator. Output is always within `[-128, 127]`.
#[inline]
pub fn generate(phase: u32, shape: Waveform) -> i32 {
    let scaled = (phase >> 24) as i32 - 128;
    match shape {
        Waveform::Sawtooth => sawtooth(scaled),
        Waveform::Sine => sine(scaled),
        Waveform::Square => square(scaled),
        Waveform::Triangle => triangle(scaled),
    }
}
