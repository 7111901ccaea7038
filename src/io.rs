//! Hardware collaborator contracts.
//!
//! Key-matrix scanning, encoder decoding, display rendering and presence
//! wiring are board concerns; the firmware core talks to them through the
//! traits here. The `sim` feature provides in-memory implementations, a
//! hardware port supplies its own.

use crate::state::{Connections, Role, Side, UnitState};
use crate::voices::{Voice, VoiceRegistry};
use crate::waveform::Waveform;

/// Scans the twelve note keys.
pub trait KeyScanner: Send + Sync {
    /// Pressed-key mask for this scan period; bit `i` set means note `i`
    /// is held down.
    fn scan(&self) -> u16;
}

/// The three rotary controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Waveform select, detents 0..=3.
    Waveform,
    /// Octave select, detents 1..=7.
    Octave,
    /// Volume, detents 0..=8. Its push switch doubles as the
    /// claim-Receiver button.
    Volume,
}

/// Snapshot of one control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlState {
    /// Current detent position.
    pub rotation: u8,
    /// Push switch held down.
    pub pressed: bool,
    /// Whether `rotation` is meaningful yet. Encoders power up in an
    /// unknown detent; the position is trusted only after an assignment or
    /// a bus sync loads it.
    pub loaded: bool,
}

/// Rotary encoders plus the joystick.
pub trait ControlSurface: Send + Sync {
    /// Current state of one control.
    fn control(&self, control: Control) -> ControlState;

    /// Pushes an authoritative value into a control and marks it loaded,
    /// so a later local twist starts from the synced position.
    fn sync_rotation(&self, control: Control, value: u8);

    /// Calibrates a control: its current physical position becomes trusted
    /// without changing it. Runs once assignment gives the settings meaning.
    fn load(&self, control: Control);

    /// Raw joystick Y reading, 0..=1023, centred at 512.
    fn joystick_y(&self) -> u16;
}

/// What the display shows each refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayFrame {
    /// Current role of this unit.
    pub role: Role,
    /// Loop playback active.
    pub looping: bool,
    /// Sounding voices, oldest first.
    pub voices: Vec<Voice>,
    /// Selected waveform.
    pub waveform: Waveform,
    /// This unit's octave.
    pub octave: u8,
    /// Output volume.
    pub volume: u8,
}

impl DisplayFrame {
    /// Collects a frame from the live state and voice registry.
    pub fn gather(state: &UnitState, voices: &VoiceRegistry) -> DisplayFrame {
        let voices = voices.snapshot().iter().rev().filter_map(|slot| *slot).collect();
        DisplayFrame {
            role: state.role(),
            looping: state.is_looping(),
            voices,
            waveform: state.waveform(),
            octave: state.octave(),
            volume: state.volume(),
        }
    }
}

/// Receives one frame per display period.
pub trait DisplaySink: Send + Sync {
    /// Renders the frame. Runs on the display task; must not block for
    /// longer than a refresh period.
    fn render(&self, frame: &DisplayFrame);
}

/// The per-side presence lines, independent of the bus.
///
/// Each unit drives one output per side and senses its neighbour's output
/// on the same side. An unconnected side senses absent.
pub trait PresenceLines: Send + Sync {
    /// Whether a neighbour is asserting its line towards this side.
    fn sense(&self, side: Side) -> bool;

    /// Asserts or releases this unit's own output on the given side.
    fn drive(&self, side: Side, asserted: bool);

    /// Sensed neighbour mask, both sides read back to back.
    fn mask(&self) -> Connections {
        let mut mask = Connections::empty();
        if self.sense(Side::West) {
            mask |= Connections::WEST;
        }
        if self.sense(Side::East) {
            mask |= Connections::EAST;
        }
        mask
    }
}
