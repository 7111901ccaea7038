//! Offline WAV render.

use std::path::Path;

use crate::constants::SAMPLE_RATE;
use crate::engine::{AudioEngine, RunMode};
use crate::{Result, SynthError};

/// Renders the engine to a 16-bit mono WAV file at the synth rate.
///
/// `mode` decides the length: [`RunMode::Offline`] renders exactly
/// `sample_limit` samples. [`RunMode::Realtime`] is rejected, an endless
/// stream cannot land in a file.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use stacksynth::{AudioEngine, RunMode, UnitState, Voice, VoiceRegistry};
///
/// # fn main() -> stacksynth::Result<()> {
/// let state = Arc::new(UnitState::new());
/// state.set_volume(8);
/// let voices = Arc::new(VoiceRegistry::new());
/// voices.press(Voice::new(9, 4));
/// voices.apply_bend(512);
/// let engine = AudioEngine::new(voices, state);
///
/// // One second of A4.
/// stacksynth::write_wav(&engine, RunMode::Offline { sample_limit: 22_000 }, "a4.wav")?;
/// # Ok(())
/// # }
/// ```
pub fn write_wav<P: AsRef<Path>>(engine: &AudioEngine, mode: RunMode, path: P) -> Result<()> {
    let sample_limit = match mode {
        RunMode::Offline { sample_limit } => sample_limit,
        RunMode::Realtime => {
            return Err(SynthError::AudioFileError(
                "realtime mode cannot render to a file".into(),
            ));
        }
    };

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path.as_ref(), spec)
        .map_err(|e| SynthError::AudioFileError(format!("failed to create WAV file: {e}")))?;

    let mut chunk = [0u8; 512];
    let mut remaining = sample_limit as usize;
    while remaining > 0 {
        let take = remaining.min(chunk.len());
        engine.fill(&mut chunk[..take]);
        for &sample in &chunk[..take] {
            writer
                .write_sample(widen(sample))
                .map_err(|e| SynthError::AudioFileError(format!("failed to write sample: {e}")))?;
        }
        remaining -= take;
    }

    writer
        .finalize()
        .map_err(|e| SynthError::AudioFileError(format!("failed to finalize WAV file: {e}")))?;
    Ok(())
}

/// Centres a byte sample and widens it to 16 bits.
#[inline]
fn widen(sample: u8) -> i16 {
    ((sample as i16) - 128) << 8
}
