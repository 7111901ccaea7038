//! Chain convergence and hot-plug handling.
//!
//! At boot every unit asserts both presence outputs and waits. Positions
//! then ripple west to east: a unit whose west side reads absent takes
//! `highest_octave + 1` as its position (the `u8::MAX` boot sentinel makes
//! the westmost unit position 0), announces it with `NewHandshake` and
//! releases its east output, handing the turn to its neighbour. The
//! eastmost unit closes the ripple with `FinalHandshake`, after which every
//! unit derives its octave, the chain bounds and the Receiver role from its
//! own position. Convergence is one-shot; later neighbour changes go
//! through the debounced hot-plug path instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::bus::{BusSender, Message};
use crate::constants::{OCTAVE_MAX, OCTAVE_MIN, REFERENCE_OCTAVE};
use crate::io::{Control, ControlSurface, PresenceLines};
use crate::state::{Connections, Side, UnitState};
use crate::unit::TimingProfile;

/// Blocks the key-scan task until topology assigns this unit a meaning.
///
/// Opened exactly once: by convergence, or by shutdown so a gated scan
/// thread can exit.
pub struct ScanGate {
    open: Mutex<bool>,
    opened: Condvar,
}

impl ScanGate {
    /// Closed gate.
    pub fn new() -> Self {
        ScanGate {
            open: Mutex::new(false),
            opened: Condvar::new(),
        }
    }

    /// Opens the gate and wakes all waiters. Idempotent.
    pub fn open(&self) {
        let mut open = self.open.lock();
        *open = true;
        self.opened.notify_all();
    }

    /// Blocks until the gate opens.
    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
    }

    /// Whether the gate has opened.
    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }
}

impl Default for ScanGate {
    fn default() -> Self {
        ScanGate::new()
    }
}

/// Drives convergence at boot and neighbour changes afterwards.
pub struct TopologyController {
    state: Arc<UnitState>,
    controls: Arc<dyn ControlSurface>,
    presence: Arc<dyn PresenceLines>,
    direct: BusSender,
    outbound: SyncSender<Message>,
    scan_gate: Arc<ScanGate>,
    timing: TimingProfile,
    rippled: AtomicBool,
    eastmost: AtomicBool,
    converged: AtomicBool,
}

impl TopologyController {
    /// Controller over a unit's state and presence wiring.
    ///
    /// Handshake frames go out on `direct`, bypassing the outbound queue;
    /// hot-plug updates queue through `outbound` like any other traffic.
    pub fn new(
        state: Arc<UnitState>,
        controls: Arc<dyn ControlSurface>,
        presence: Arc<dyn PresenceLines>,
        direct: BusSender,
        outbound: SyncSender<Message>,
        scan_gate: Arc<ScanGate>,
        timing: TimingProfile,
    ) -> Self {
        TopologyController {
            state,
            controls,
            presence,
            direct,
            outbound,
            scan_gate,
            timing,
            rippled: AtomicBool::new(false),
            eastmost: AtomicBool::new(false),
            converged: AtomicBool::new(false),
        }
    }

    /// Whether this unit has an assigned octave and role.
    #[inline]
    pub fn is_converged(&self) -> bool {
        self.converged.load(Ordering::Relaxed)
    }

    fn converge(&self) {
        self.converged.store(true, Ordering::Relaxed);
        self.scan_gate.open();
    }

    /// Convergence loop, run on the topology task.
    ///
    /// Returns once converged (also via a frame handled by the router), on
    /// the convergence watchdog, or when `running` clears at shutdown.
    pub fn run(&self, running: &AtomicBool) {
        std::thread::sleep(self.timing.boot_grace);
        let started = Instant::now();
        let mut first_poll = true;

        while running.load(Ordering::Relaxed) && !self.is_converged() {
            std::thread::sleep(self.timing.topology_tick);
            if self.is_converged() {
                break;
            }
            let west_absent = !self.presence.sense(Side::West);
            let east_absent = !self.presence.sense(Side::East);

            // A unit that is alone on its first poll is its own chain.
            if west_absent && east_absent && first_poll {
                log::info!("no neighbours sensed, running solo");
                self.assign(0, 0);
                self.converge();
                break;
            }
            first_poll = false;

            if !west_absent && east_absent {
                self.eastmost.store(true, Ordering::Relaxed);
            }

            if west_absent && east_absent && self.eastmost.load(Ordering::Relaxed) {
                // West neighbour released its line: the ripple reached us
                // and we are the east end, so close the handshake.
                let length = self.state.highest_octave().wrapping_add(1);
                self.state.set_octave(length);
                log::info!("eastmost at position {length}, finishing handshake");
                if self.direct.send(&Message::FinalHandshake { length }).is_err() {
                    return;
                }
                self.assign(length, length);
                self.converge();
                break;
            } else if west_absent && !self.rippled.load(Ordering::Relaxed) {
                let position = self.state.highest_octave().wrapping_add(1);
                self.state.set_octave(position);
                self.state.set_highest_octave(position);
                log::debug!("taking chain position {position}");
                if self.direct.send(&Message::NewHandshake { position }).is_err() {
                    return;
                }
                self.rippled.store(true, Ordering::Relaxed);
                self.presence.drive(Side::East, false);
            }

            if let Some(timeout) = self.timing.convergence_timeout {
                if started.elapsed() >= timeout {
                    log::warn!("convergence timed out, self-assigning solo");
                    self.assign(0, 0);
                    self.converge();
                    break;
                }
            }
        }
    }

    /// Derives octave, bounds and role from the chain geometry.
    ///
    /// `length` is the eastmost position (units minus one), `position` this
    /// unit's own. The arithmetic is signed and clamped to the playable
    /// octave range; exactly one pre-clamp position lands on the reference
    /// octave and that unit takes the Receiver role. The flag is only ever
    /// set here, never cleared.
    pub fn assign(&self, length: u8, position: u8) {
        let half = (length / 2) as i32;
        let even = (length % 2) as i32;
        let reference = REFERENCE_OCTAVE as i32;
        let low = OCTAVE_MIN as i32;
        let high = OCTAVE_MAX as i32;

        let octave = (reference + position as i32 - half).clamp(low, high) as u8;
        let lowest = (reference - half).max(low) as u8;
        let highest = (reference + half + even).min(high) as u8;

        self.state.set_octave(octave);
        self.state.set_lowest_octave(lowest);
        self.state.set_highest_octave(highest);
        if octave == REFERENCE_OCTAVE {
            self.state.set_receiver(true);
        }
        log::info!(
            "assigned octave {octave} of {lowest}..={highest}, role {:?}",
            self.state.role()
        );

        self.controls.sync_rotation(Control::Octave, octave);
        self.controls.load(Control::Waveform);
        self.controls.load(Control::Volume);
    }

    /// Re-asserts both presence outputs, reads and stores the fresh mask.
    pub fn refresh_connections(&self) -> Connections {
        self.presence.drive(Side::West, true);
        self.presence.drive(Side::East, true);
        let mask = self.presence.mask();
        self.state.set_connections(mask);
        mask
    }

    /// Ripple step heard on the bus: the west neighbour took `position`.
    pub fn on_new_handshake(&self, position: u8) {
        if !self.is_converged() {
            self.state.set_highest_octave(position);
        }
    }

    /// Handshake close heard on the bus.
    pub fn on_final_handshake(&self, length: u8) {
        if !self.is_converged() {
            self.assign(length, self.state.octave());
            self.converge();
        }
    }

    /// Highest-bound update; with `assign` set, an unconverged unit sensing
    /// only a west neighbour adopts the octave (east-end hot-plug).
    pub fn on_highest_octave(&self, octave: u8, assign: bool) {
        self.state.set_highest_octave(octave);
        if assign && !self.is_converged() && self.refresh_connections() == Connections::WEST {
            log::info!("adopted octave {octave} from the chain's east end");
            self.state.set_octave(octave);
            self.controls.sync_rotation(Control::Octave, octave);
            self.controls.load(Control::Waveform);
            self.controls.load(Control::Volume);
            self.converge();
        }
    }

    /// Lowest-bound update, mirror of [`on_highest_octave`] for the west end.
    ///
    /// [`on_highest_octave`]: TopologyController::on_highest_octave
    pub fn on_lowest_octave(&self, octave: u8, assign: bool) {
        self.state.set_lowest_octave(octave);
        if assign && !self.is_converged() && self.refresh_connections() == Connections::EAST {
            log::info!("adopted octave {octave} from the chain's west end");
            self.state.set_octave(octave);
            self.controls.sync_rotation(Control::Octave, octave);
            self.controls.load(Control::Waveform);
            self.controls.load(Control::Volume);
            self.converge();
        }
    }

    /// Applies a debounced neighbour-mask change after convergence.
    ///
    /// The new mask is stored before anything is queued: the transmit task
    /// gates on the stored mask and this port has no scheduler priorities
    /// to order the two the other way round.
    pub fn update_connections(&self, new: Connections) {
        let old = self.state.connections();
        let diff = new.bits() as i32 - old.bits() as i32;
        if diff == 0 {
            return;
        }

        let octave = self.state.octave() as i32;
        let lowest = self.state.lowest_octave();
        let highest = self.state.highest_octave();
        let receiver_octave = self.state.receiver_octave() as i32;
        self.state.set_connections(new);

        if diff > 0 {
            // A neighbour appeared: give its electronics time to settle,
            // then re-sync the chain-wide settings for it.
            std::thread::sleep(self.timing.power_settle);
            let waveform = self.controls.control(Control::Waveform);
            if waveform.loaded {
                let _ = self.outbound.send(Message::Waveform { waveform: waveform.rotation });
            }
            let volume = self.controls.control(Control::Volume);
            if volume.loaded {
                let _ = self.outbound.send(Message::Volume { volume: volume.rotation });
            }
        }

        match diff.abs() {
            1 => {
                // East side changed.
                let mut new_highest = if diff < 0 {
                    if receiver_octave > octave {
                        log::info!("receiver lost to the east, claiming the role");
                        let _ = self.outbound.send(Message::ReceiverClaim { octave: octave as u8 });
                        self.state.set_receiver(true);
                    }
                    highest as i32 - 1
                } else {
                    (highest as i32 + 1).min(OCTAVE_MAX as i32)
                };
                new_highest = new_highest.max(octave);
                self.state.set_highest_octave(new_highest as u8);
                log::debug!("east side now {:?}, highest octave {new_highest}", new);
                if !new.is_empty() {
                    let _ = self.outbound.send(Message::LowestOctave { octave: lowest, assign: false });
                    let _ = self.outbound.send(Message::HighestOctave {
                        octave: new_highest as u8,
                        assign: true,
                    });
                }
            }
            2 => {
                // West side changed, mirror image.
                let mut new_lowest = if diff < 0 {
                    if receiver_octave < octave {
                        log::info!("receiver lost to the west, claiming the role");
                        let _ = self.outbound.send(Message::ReceiverClaim { octave: octave as u8 });
                        self.state.set_receiver(true);
                    }
                    lowest as i32 + 1
                } else {
                    (lowest as i32 - 1).max(OCTAVE_MIN as i32)
                };
                new_lowest = new_lowest.min(octave);
                self.state.set_lowest_octave(new_lowest as u8);
                log::debug!("west side now {:?}, lowest octave {new_lowest}", new);
                if !new.is_empty() {
                    let _ = self.outbound.send(Message::HighestOctave { octave: highest, assign: false });
                    let _ = self.outbound.send(Message::LowestOctave {
                        octave: new_lowest as u8,
                        assign: true,
                    });
                }
            }
            // Both sides at once: trust the mask, bounds catch up through
            // the per-side paths as the debounce settles.
            _ => {}
        }
    }
}
