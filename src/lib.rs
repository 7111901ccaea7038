//! Firmware core for a modular stackable keyboard synthesizer
//!
//! Each keyboard unit spans one octave of keys. Units clip together into a
//! west-to-east chain and negotiate octaves and roles among themselves over
//! a shared 8-byte broadcast bus plus one dedicated presence line per side.
//! The unit assigned the reference octave becomes the *Receiver* and plays
//! every note in the chain through a ten-voice phase-accumulator synth; all
//! other units relay their key events onto the bus.
//!
//! # Features
//! - Boot-time topology convergence: position ripple, octave assignment,
//!   exactly one Receiver per chain
//! - Hot-plug at either chain end with bound adjustment, settings re-sync
//!   and Receiver handover
//! - Ten voices, newest-wins slot allocation, four waveforms at 22 kHz
//! - Joystick vibrato with per-voice pitch bend
//! - Typed codec for the 8-byte wire protocol
//! - Hardware surfaces as traits, with an in-memory simulation harness
//!
//! # Crate feature flags
//! - `sim` (default): In-memory chain simulation (`sim`)
//! - `streaming` (opt-in): Real-time audio output (enables optional `rodio` dep)
//! - `export-wav` (opt-in): Offline render to WAV (enables optional `hound` dep)
//!
//! # Quick start
//! ## Synth core only
//! ```no_run
//! use std::sync::Arc;
//! use stacksynth::{AudioEngine, UnitState, Voice, VoiceRegistry};
//!
//! let state = Arc::new(UnitState::new());
//! state.set_volume(8);
//! let voices = Arc::new(VoiceRegistry::new());
//! voices.press(Voice::new(9, 4)); // A4
//! voices.apply_bend(512); // joystick at rest
//! let engine = AudioEngine::new(Arc::clone(&voices), Arc::clone(&state));
//! let _sample = engine.next_sample();
//! ```
//!
//! ## Simulated chain
//! ```no_run
//! # #[cfg(feature = "sim")]
//! # {
//! use std::time::Duration;
//! use stacksynth::sim::Chain;
//! use stacksynth::UnitConfig;
//!
//! let chain = Chain::start(3, &UnitConfig::simulation());
//! assert!(chain.wait_converged(Duration::from_secs(2)));
//! chain.unit(0).keys.press(9); // A, played on the Receiver
//! chain.shutdown();
//! # }
//! ```

#![warn(missing_docs)]

// Domain modules
pub mod bus; // Wire protocol codec and transport seam
pub mod constants; // Fixed protocol and synth parameters
pub mod engine; // Per-sample polyphonic mixer
pub mod io; // Hardware collaborator contracts
pub mod notes; // Step-size table and pitch arithmetic
pub mod router; // Frame dispatch and role-based routing
pub mod state; // Shared per-unit state
pub mod topology; // Chain convergence and hot-plug handling
pub mod unit; // Task wiring and lifecycle
pub mod voices; // Active-voice registry
pub mod waveform; // Waveform generators

#[cfg(feature = "export-wav")]
pub mod export; // Offline WAV render
#[cfg(feature = "sim")]
pub mod sim; // In-memory chain simulation
#[cfg(feature = "streaming")]
pub mod streaming; // Audio output and streaming

/// Error types for synthesizer unit operations
#[derive(thiserror::Error, Debug)]
pub enum SynthError {
    /// Bus transport failure (closed or detached port)
    #[error("Bus error: {0}")]
    BusError(String),

    /// Error writing audio file
    #[error("Audio file write error: {0}")]
    AudioFileError(String),

    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Audio device error
    #[error("Audio device error: {0}")]
    AudioDeviceError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for SynthError {
    /// Converts a String into `SynthError::Other`.
    ///
    /// Convenience for generic string errors; prefer the specific variant
    /// constructors (`ConfigError`, `BusError`, ...) where the failure class
    /// is known, so callers can still discriminate.
    fn from(msg: String) -> Self {
        SynthError::Other(msg)
    }
}

impl From<&str> for SynthError {
    /// Converts a string slice into `SynthError::Other`. See [`From<String>`].
    fn from(msg: &str) -> Self {
        SynthError::Other(msg.to_string())
    }
}

/// Result type for synthesizer unit operations
pub type Result<T> = std::result::Result<T, SynthError>;

// Public API exports
pub use bus::{BusPort, BusSender, Frame, Message};
pub use engine::{AudioEngine, RunMode};
pub use io::{Control, ControlState, ControlSurface, DisplayFrame, DisplaySink, KeyScanner, PresenceLines};
pub use state::{Connections, Role, Side, UnitState};
pub use unit::{Peripherals, TimingProfile, Unit, UnitConfig, UnitHandle};
pub use voices::{Voice, VoiceRegistry};
pub use waveform::Waveform;

#[cfg(feature = "export-wav")]
pub use export::write_wav;
#[cfg(feature = "streaming")]
pub use streaming::{AudioDevice, RingBuffer, StreamConfig};
