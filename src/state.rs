//! Shared per-unit state.
//!
//! One [`UnitState`] is shared by `Arc` between every task of a unit. Scalar
//! fields are independently meaningful, so each is a relaxed atomic; the key
//! snapshot is a composite written once per scan and lives behind a mutex
//! whose guard is never held across a wait.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::constants::{VOLUME_MAX, WAVEFORM_COUNT};
use crate::waveform::Waveform;

bitflags::bitflags! {
    /// Sensed neighbour mask.
    ///
    /// EAST is bit 0 and WEST bit 1, so a single-sided change shows up in
    /// the numeric mask difference as ±1 (east) or ±2 (west).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Connections: u8 {
        /// Neighbour present on the east side.
        const EAST = 0b01;
        /// Neighbour present on the west side.
        const WEST = 0b10;
    }
}

/// Which end of the chain a line or neighbour is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Towards the low-octave end.
    West,
    /// Towards the high-octave end.
    East,
}

impl Side {
    /// Connection-mask bit for this side.
    #[inline]
    pub fn connection(self) -> Connections {
        match self {
            Side::West => Connections::WEST,
            Side::East => Connections::EAST,
        }
    }
}

/// Role of a unit within the chain.
///
/// Exactly one unit per converged chain holds [`Role::Receiver`] and sounds
/// every note; the rest relay their key events onto the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Plays notes for the whole chain.
    Receiver,
    /// Forwards local key events onto the bus.
    Relay,
}

/// Mutable state shared between the tasks of one unit.
///
/// Octave fields boot to out-of-band values: `octave` and `lowest_octave`
/// to 0 (unassigned) and `highest_octave` to `u8::MAX`, the sentinel whose
/// wrapping increment yields ripple position 0 on the westmost unit. The
/// octave and bound setters are deliberately unclamped because they carry
/// chain positions during convergence; `volume` and `waveform` clamp.
pub struct UnitState {
    receiver: AtomicBool,
    looping: AtomicBool,
    keys: Mutex<u16>,
    waveform: AtomicU8,
    volume: AtomicU8,
    connections: AtomicU8,
    octave: AtomicU8,
    lowest_octave: AtomicU8,
    highest_octave: AtomicU8,
    receiver_octave: AtomicU8,
}

impl UnitState {
    /// Boot-time state: no role, no neighbours, octaves unassigned.
    pub fn new() -> Self {
        UnitState {
            receiver: AtomicBool::new(false),
            looping: AtomicBool::new(false),
            keys: Mutex::new(0),
            waveform: AtomicU8::new(0),
            volume: AtomicU8::new(0),
            connections: AtomicU8::new(0),
            octave: AtomicU8::new(0),
            lowest_octave: AtomicU8::new(0),
            highest_octave: AtomicU8::new(u8::MAX),
            receiver_octave: AtomicU8::new(4),
        }
    }

    /// Whether this unit currently holds the Receiver role.
    #[inline]
    pub fn is_receiver(&self) -> bool {
        self.receiver.load(Ordering::Relaxed)
    }

    /// Sets or clears the Receiver role.
    pub fn set_receiver(&self, receiver: bool) {
        self.receiver.store(receiver, Ordering::Relaxed);
    }

    /// Current role, derived from the receiver flag.
    #[inline]
    pub fn role(&self) -> Role {
        if self.is_receiver() {
            Role::Receiver
        } else {
            Role::Relay
        }
    }

    /// Whether loop playback is active.
    #[inline]
    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Relaxed)
    }

    /// Sets the loop playback flag.
    pub fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::Relaxed);
    }

    /// Pressed-key mask of the most recent scan (bit per note key).
    pub fn keys(&self) -> u16 {
        *self.keys.lock()
    }

    /// Stores the pressed-key mask for this scan.
    pub fn set_keys(&self, keys: u16) {
        *self.keys.lock() = keys;
    }

    /// Selected waveform.
    #[inline]
    pub fn waveform(&self) -> Waveform {
        Waveform::from_index(self.waveform.load(Ordering::Relaxed)).unwrap_or_default()
    }

    /// Selected waveform as its wire index.
    #[inline]
    pub fn waveform_index(&self) -> u8 {
        self.waveform.load(Ordering::Relaxed)
    }

    /// Selects a waveform by wire index, clamped to the valid range.
    pub fn set_waveform(&self, index: u8) {
        self.waveform.store(index.min(WAVEFORM_COUNT - 1), Ordering::Relaxed);
    }

    /// Output volume, 0 (muted) to 8 (full).
    #[inline]
    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }

    /// Sets the output volume, clamped to the valid range.
    pub fn set_volume(&self, volume: u8) {
        self.volume.store(volume.min(VOLUME_MAX), Ordering::Relaxed);
    }

    /// Last stored neighbour mask.
    #[inline]
    pub fn connections(&self) -> Connections {
        Connections::from_bits_truncate(self.connections.load(Ordering::Relaxed))
    }

    /// Stores the neighbour mask.
    pub fn set_connections(&self, connections: Connections) {
        self.connections.store(connections.bits(), Ordering::Relaxed);
    }

    /// This unit's octave. Carries the ripple position during convergence.
    #[inline]
    pub fn octave(&self) -> u8 {
        self.octave.load(Ordering::Relaxed)
    }

    /// Stores the octave. Unclamped; convergence stores raw positions here.
    pub fn set_octave(&self, octave: u8) {
        self.octave.store(octave, Ordering::Relaxed);
    }

    /// Lowest octave present in the chain, as last heard.
    #[inline]
    pub fn lowest_octave(&self) -> u8 {
        self.lowest_octave.load(Ordering::Relaxed)
    }

    /// Stores the chain's lowest octave.
    pub fn set_lowest_octave(&self, octave: u8) {
        self.lowest_octave.store(octave, Ordering::Relaxed);
    }

    /// Highest octave present in the chain, as last heard.
    ///
    /// Boots to `u8::MAX` and carries neighbour positions during the ripple.
    #[inline]
    pub fn highest_octave(&self) -> u8 {
        self.highest_octave.load(Ordering::Relaxed)
    }

    /// Stores the chain's highest octave.
    pub fn set_highest_octave(&self, octave: u8) {
        self.highest_octave.store(octave, Ordering::Relaxed);
    }

    /// Octave of the unit currently holding the Receiver role.
    #[inline]
    pub fn receiver_octave(&self) -> u8 {
        self.receiver_octave.load(Ordering::Relaxed)
    }

    /// Stores the Receiver's octave as announced on the bus.
    pub fn set_receiver_octave(&self, octave: u8) {
        self.receiver_octave.store(octave, Ordering::Relaxed);
    }
}

impl Default for UnitState {
    fn default() -> Self {
        UnitState::new()
    }
}
