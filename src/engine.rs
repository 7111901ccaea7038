//! Per-sample polyphonic mixer.
//!
//! [`AudioEngine::next_sample`] is the sample-tick routine: it is called
//! once per sample period by whatever drives output (a live audio pump, the
//! offline renderer, or a test) and must finish well inside that period. It
//! never blocks; the only lock it takes is the registry's slot guard, held
//! for a single array copy.

use std::sync::Arc;

use crate::constants::{ACCUMULATORS, VOLUME_MAX};
use crate::notes::transpose;
use crate::state::UnitState;
use crate::voices::VoiceRegistry;
use crate::waveform;

/// How engine output is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RunMode {
    /// Samples are pulled live at the sample rate.
    Realtime,
    /// Render exactly `sample_limit` samples, then stop.
    Offline {
        /// Number of samples to render.
        sample_limit: u32,
    },
}

/// Mixes the active voices into one unsigned 8-bit output stream.
///
/// Each occupied slot contributes `generate(phase, waveform) << 3`; the sum
/// is attenuated by `>> (8 - volume)`, divided by the fixed slot count
/// (one divide instead of ten), biased to mid-scale and clamped.
///
/// Clones share the same registry and state, so any clone can feed an
/// output thread.
#[derive(Clone)]
pub struct AudioEngine {
    voices: Arc<VoiceRegistry>,
    state: Arc<UnitState>,
}

impl AudioEngine {
    /// Engine over a shared voice registry and unit state.
    pub fn new(voices: Arc<VoiceRegistry>, state: Arc<UnitState>) -> Self {
        AudioEngine { voices, state }
    }

    /// Produces the next output sample.
    ///
    /// Silence is the mid-scale value 128; a muted or empty mix converges
    /// there rather than to 0.
    pub fn next_sample(&self) -> u8 {
        let volume = self.state.volume();
        let shape = self.state.waveform();
        let slots = self.voices.snapshot();

        let mut mix: i32 = 0;
        for (i, slot) in slots.iter().enumerate() {
            if let Some(voice) = slot {
                let step = transpose(self.voices.bent_step(i), voice.octave);
                let phase = self.voices.advance_phase(i, step);
                mix += waveform::generate(phase, shape) << 3;
            }
        }

        mix >>= (VOLUME_MAX - volume) as u32;
        mix /= ACCUMULATORS as i32;
        (mix + 128).clamp(0, 255) as u8
    }

    /// Renders consecutive samples into `buf`.
    pub fn fill(&self, buf: &mut [u8]) {
        for sample in buf.iter_mut() {
            *sample = self.next_sample();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::JOYSTICK_CENTRE;
    use crate::voices::Voice;
    use crate::waveform::Waveform;

    fn engine_with(voices: &[Voice], volume: u8, shape: Waveform) -> AudioEngine {
        let state = Arc::new(UnitState::new());
        state.set_volume(volume);
        state.set_waveform(shape.index());
        let registry = Arc::new(VoiceRegistry::new());
        for &voice in voices {
            registry.press(voice);
        }
        registry.apply_bend(JOYSTICK_CENTRE);
        AudioEngine::new(registry, state)
    }

    #[test]
    fn test_silence_sits_at_mid_scale() {
        let engine = engine_with(&[], 8, Waveform::Sawtooth);
        for _ in 0..16 {
            assert_eq!(engine.next_sample(), 128);
        }
    }

    #[test]
    fn test_single_sawtooth_voice_first_sample() {
        // A4 advances the phase to 85_899_000; top byte 5, re-centred -123,
        // headroom shift -984, divided by ten slots -98, biased 30.
        let engine = engine_with(&[Voice::new(10, 4)], 8, Waveform::Sawtooth);
        assert_eq!(engine.next_sample(), 30);
    }

    #[test]
    fn test_octave_transposition_doubles_the_step() {
        // Same note one octave up: phase 171_798_000, top byte 10.
        let engine = engine_with(&[Voice::new(10, 5)], 8, Waveform::Sawtooth);
        assert_eq!(engine.next_sample(), 34);
    }

    #[test]
    fn test_volume_attenuates_the_mix() {
        let engine = engine_with(&[Voice::new(10, 4)], 4, Waveform::Sawtooth);
        // -984 >> 4 = -62, / 10 = -6, biased 122.
        assert_eq!(engine.next_sample(), 122);
    }

    #[test]
    fn test_muted_volume_flattens_to_mid_scale() {
        let engine = engine_with(&[Voice::new(10, 4)], 0, Waveform::Sawtooth);
        // -984 >> 8 = -4, / 10 = 0.
        assert_eq!(engine.next_sample(), 128);
    }

    #[test]
    fn test_full_registry_clamps_rather_than_wraps() {
        let voices = [Voice::new(11, 7); ACCUMULATORS];
        let engine = engine_with(&voices, 8, Waveform::Square);
        // Ten square voices all land in the negative half-cycle first.
        assert_eq!(engine.next_sample(), 0);
    }

    #[test]
    fn test_every_shape_produces_a_moving_signal() {
        let voices = [Voice::new(11, 7), Voice::new(0, 1), Voice::new(5, 4)];
        for shape in [
            Waveform::Sawtooth,
            Waveform::Sine,
            Waveform::Square,
            Waveform::Triangle,
        ] {
            let engine = engine_with(&voices, 8, shape);
            let mut buf = vec![0u8; 1000];
            engine.fill(&mut buf);
            assert!(buf.iter().any(|&s| s != 128), "{shape:?} stayed silent");
        }
    }

    #[test]
    fn test_offline_render_is_deterministic() {
        let render = || {
            let engine = engine_with(&[Voice::new(10, 4), Voice::new(5, 3)], 6, Waveform::Sine);
            let mut buf = vec![0u8; 256];
            engine.fill(&mut buf);
            buf
        };
        assert_eq!(render(), render());
    }
}
