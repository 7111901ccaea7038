//! In-memory chain simulation.
//!
//! Every hardware seam gets a process-local stand-in: the broadcast bus
//! becomes a hub of bounded channels, presence lines become shared wires,
//! keys and controls become values a test can poke. [`Chain`] clips `n`
//! simulated units together the way physical boards would be, runs the real
//! firmware tasks on real threads and exposes each unit's inputs.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::bus::{BusPort, Frame};
use crate::constants::{
    JOYSTICK_CENTRE, NOTES_PER_OCTAVE, OCTAVE_MAX, OCTAVE_MIN, QUEUE_CAPACITY, VOLUME_MAX,
    WAVEFORM_COUNT,
};
use crate::engine::AudioEngine;
use crate::io::{
    Control, ControlState, ControlSurface, DisplayFrame, DisplaySink, KeyScanner, PresenceLines,
};
use crate::state::{Side, UnitState};
use crate::unit::{Peripherals, Unit, UnitConfig, UnitHandle};
use crate::voices::{Voice, VoiceRegistry};
use crate::{Result, SynthError};

/// The shared broadcast bus.
///
/// Frames sent through any attached port reach every other port. A port
/// whose reader has fallen a queue behind drops further frames, which is
/// what the hardware controller does on a receive overrun.
pub struct BusHub {
    inner: Mutex<HubInner>,
}

struct HubInner {
    taps: Vec<(usize, mpsc::SyncSender<Frame>)>,
    next_id: usize,
}

impl BusHub {
    /// An empty hub.
    pub fn new() -> Self {
        BusHub {
            inner: Mutex::new(HubInner {
                taps: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// Attaches a new port to the hub.
    pub fn attach(self: &Arc<Self>) -> Arc<SimPort> {
        let (tx, rx) = mpsc::sync_channel(QUEUE_CAPACITY);
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.taps.push((id, tx.clone()));
        Arc::new(SimPort {
            hub: Arc::clone(self),
            id,
            rx: Mutex::new(rx),
            waker: tx,
            closed: AtomicBool::new(false),
            unplugged: AtomicBool::new(false),
        })
    }

    fn broadcast(&self, from: usize, frame: Frame) {
        for (id, tap) in &self.inner.lock().taps {
            if *id == from {
                continue;
            }
            if tap.try_send(frame).is_err() {
                log::trace!("port {id} overran, dropping a frame");
            }
        }
    }

    fn detach(&self, id: usize) {
        self.inner.lock().taps.retain(|(tap_id, _)| *tap_id != id);
    }
}

impl Default for BusHub {
    fn default() -> Self {
        BusHub::new()
    }
}

/// One unit's connection to the [`BusHub`].
pub struct SimPort {
    hub: Arc<BusHub>,
    id: usize,
    rx: Mutex<mpsc::Receiver<Frame>>,
    waker: mpsc::SyncSender<Frame>,
    closed: AtomicBool,
    unplugged: AtomicBool,
}

impl SimPort {
    /// Severs the port from the hub while the unit keeps running, the bus
    /// half of unclipping a board. Later sends go nowhere; nothing more
    /// arrives.
    pub fn unplug(&self) {
        self.unplugged.store(true, Ordering::Release);
        self.hub.detach(self.id);
    }
}

impl BusPort for SimPort {
    fn send(&self, frame: Frame) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(SynthError::BusError("port closed".into()));
        }
        if self.unplugged.load(Ordering::Acquire) {
            return Ok(());
        }
        self.hub.broadcast(self.id, frame);
        Ok(())
    }

    fn recv(&self) -> Result<Frame> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(SynthError::BusError("port closed".into()));
        }
        let frame = self
            .rx
            .lock()
            .recv()
            .map_err(|_| SynthError::BusError("bus hub gone".into()))?;
        if self.closed.load(Ordering::Relaxed) {
            return Err(SynthError::BusError("port closed".into()));
        }
        Ok(frame)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.hub.detach(self.id);
        // Wake a reader blocked in recv so it can see the flag.
        let _ = self.waker.try_send([0; 8]);
    }
}

/// Presence wiring for one unit: two outputs it drives, two inputs wired
/// to whatever neighbour [`SimPresence::connect`] gave it on that side.
///
/// Outputs power up asserted, like the board's handshake pins.
pub struct SimPresence {
    west_in: Mutex<Option<Arc<AtomicBool>>>,
    east_in: Mutex<Option<Arc<AtomicBool>>>,
    west_out: Arc<AtomicBool>,
    east_out: Arc<AtomicBool>,
}

impl SimPresence {
    /// Unconnected wiring, both outputs asserted.
    pub fn new() -> Self {
        SimPresence {
            west_in: Mutex::new(None),
            east_in: Mutex::new(None),
            west_out: Arc::new(AtomicBool::new(true)),
            east_out: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Clips two units together, `west` to the west of `east`.
    pub fn connect(west: &SimPresence, east: &SimPresence) {
        *west.east_in.lock() = Some(Arc::clone(&east.west_out));
        *east.west_in.lock() = Some(Arc::clone(&west.east_out));
    }

    /// Pulls the west-side plug.
    pub fn disconnect_west(&self) {
        *self.west_in.lock() = None;
    }

    /// Pulls the east-side plug.
    pub fn disconnect_east(&self) {
        *self.east_in.lock() = None;
    }
}

impl Default for SimPresence {
    fn default() -> Self {
        SimPresence::new()
    }
}

impl PresenceLines for SimPresence {
    fn sense(&self, side: Side) -> bool {
        let wire = match side {
            Side::West => self.west_in.lock(),
            Side::East => self.east_in.lock(),
        };
        wire.as_ref().is_some_and(|w| w.load(Ordering::Relaxed))
    }

    fn drive(&self, side: Side, asserted: bool) {
        let wire = match side {
            Side::West => &self.west_out,
            Side::East => &self.east_out,
        };
        wire.store(asserted, Ordering::Relaxed);
    }
}

/// Key matrix stand-in, one bit per key.
pub struct SimKeys {
    bits: AtomicU16,
}

impl SimKeys {
    /// All keys up.
    pub fn new() -> Self {
        SimKeys {
            bits: AtomicU16::new(0),
        }
    }

    /// Presses a key, 0 (C) to 11 (B).
    pub fn press(&self, note: u8) {
        debug_assert!((note as usize) < NOTES_PER_OCTAVE);
        self.bits.fetch_or(1 << note, Ordering::Relaxed);
    }

    /// Releases a key.
    pub fn release(&self, note: u8) {
        debug_assert!((note as usize) < NOTES_PER_OCTAVE);
        self.bits.fetch_and(!(1 << note), Ordering::Relaxed);
    }
}

impl Default for SimKeys {
    fn default() -> Self {
        SimKeys::new()
    }
}

impl KeyScanner for SimKeys {
    fn scan(&self) -> u16 {
        self.bits.load(Ordering::Relaxed)
    }
}

/// Encoders and joystick stand-in.
pub struct SimControls {
    waveform: Mutex<ControlState>,
    octave: Mutex<ControlState>,
    volume: Mutex<ControlState>,
    joystick: AtomicU16,
}

impl SimControls {
    /// All encoders at zero and unloaded, joystick centred.
    pub fn new() -> Self {
        let blank = ControlState {
            rotation: 0,
            pressed: false,
            loaded: false,
        };
        SimControls {
            waveform: Mutex::new(blank),
            octave: Mutex::new(blank),
            volume: Mutex::new(blank),
            joystick: AtomicU16::new(JOYSTICK_CENTRE),
        }
    }

    fn slot(&self, control: Control) -> &Mutex<ControlState> {
        match control {
            Control::Waveform => &self.waveform,
            Control::Octave => &self.octave,
            Control::Volume => &self.volume,
        }
    }

    fn limits(control: Control) -> (u8, u8) {
        match control {
            Control::Waveform => (0, WAVEFORM_COUNT - 1),
            Control::Octave => (OCTAVE_MIN, OCTAVE_MAX),
            Control::Volume => (0, VOLUME_MAX),
        }
    }

    /// Twists an encoder to `rotation`, clamped to its detent range.
    pub fn turn(&self, control: Control, rotation: u8) {
        let (low, high) = Self::limits(control);
        self.slot(control).lock().rotation = rotation.clamp(low, high);
    }

    /// Holds or releases an encoder's push switch.
    pub fn set_pressed(&self, control: Control, pressed: bool) {
        self.slot(control).lock().pressed = pressed;
    }

    /// Moves the joystick's vertical axis, 0..=1023, 512 at rest.
    pub fn set_joystick(&self, y: u16) {
        self.joystick.store(y, Ordering::Relaxed);
    }
}

impl Default for SimControls {
    fn default() -> Self {
        SimControls::new()
    }
}

impl ControlSurface for SimControls {
    fn control(&self, control: Control) -> ControlState {
        *self.slot(control).lock()
    }

    fn sync_rotation(&self, control: Control, value: u8) {
        let (low, high) = Self::limits(control);
        let mut state = self.slot(control).lock();
        state.rotation = value.clamp(low, high);
        state.loaded = true;
    }

    fn load(&self, control: Control) {
        self.slot(control).lock().loaded = true;
    }

    fn joystick_y(&self) -> u16 {
        self.joystick.load(Ordering::Relaxed)
    }
}

/// Logs each display refresh instead of driving an OLED.
pub struct ConsoleDisplay {
    label: String,
}

impl ConsoleDisplay {
    /// Display tagged with `label` in the log output.
    pub fn new(label: impl Into<String>) -> Self {
        ConsoleDisplay {
            label: label.into(),
        }
    }
}

impl DisplaySink for ConsoleDisplay {
    fn render(&self, frame: &DisplayFrame) {
        let voices: Vec<String> = frame.voices.iter().map(Voice::label).collect();
        log::debug!(
            "[{}] {:?} oct {} vol {} {} [{}]",
            self.label,
            frame.role,
            frame.octave,
            frame.volume,
            frame.waveform.name(),
            voices.join(" ")
        );
    }
}

/// One simulated unit: its inputs plus the running firmware behind them.
pub struct SimUnit {
    /// Key matrix, pokeable from tests.
    pub keys: Arc<SimKeys>,
    /// Encoders and joystick, pokeable from tests.
    pub controls: Arc<SimControls>,
    /// Presence wiring, pokeable from tests.
    pub presence: Arc<SimPresence>,
    port: Arc<SimPort>,
    handle: UnitHandle,
}

impl SimUnit {
    fn spawn(config: &UnitConfig, hub: &Arc<BusHub>, presence: Arc<SimPresence>, label: String) -> Self {
        let keys = Arc::new(SimKeys::new());
        let controls = Arc::new(SimControls::new());
        let port = hub.attach();
        let handle = Unit::new(
            config,
            Peripherals {
                keys: Arc::clone(&keys) as Arc<dyn KeyScanner>,
                controls: Arc::clone(&controls) as Arc<dyn ControlSurface>,
                display: Arc::new(ConsoleDisplay::new(label)),
                presence: Arc::clone(&presence) as Arc<dyn PresenceLines>,
                port: Arc::clone(&port) as Arc<dyn BusPort>,
            },
        )
        .spawn();
        SimUnit {
            keys,
            controls,
            presence,
            port,
            handle,
        }
    }

    /// Shared unit state.
    pub fn state(&self) -> &UnitState {
        self.handle.state()
    }

    /// Active-voice registry.
    pub fn voices(&self) -> &VoiceRegistry {
        self.handle.voices()
    }

    /// The unit's sample source.
    pub fn engine(&self) -> &AudioEngine {
        self.handle.engine()
    }

    /// Whether this unit has its octave and role.
    pub fn is_converged(&self) -> bool {
        self.handle.is_converged()
    }

    /// Stops the unit's tasks and joins them.
    pub fn shutdown(self) {
        self.handle.shutdown();
    }
}

/// A west-to-east chain of simulated units on one bus.
pub struct Chain {
    hub: Arc<BusHub>,
    units: Vec<SimUnit>,
    config: UnitConfig,
}

impl Chain {
    /// Boots `count` units clipped together, all on one shared bus.
    ///
    /// The presence wires are connected before any firmware starts, the
    /// same situation as powering up an assembled chain.
    ///
    /// # Panics
    /// If `count` is zero.
    pub fn start(count: usize, config: &UnitConfig) -> Chain {
        assert!(count > 0, "a chain needs at least one unit");
        let hub = Arc::new(BusHub::new());

        let presences: Vec<Arc<SimPresence>> =
            (0..count).map(|_| Arc::new(SimPresence::new())).collect();
        for pair in presences.windows(2) {
            SimPresence::connect(&pair[0], &pair[1]);
        }

        let units = presences
            .into_iter()
            .enumerate()
            .map(|(i, presence)| SimUnit::spawn(config, &hub, presence, format!("sim-{i}")))
            .collect();

        Chain {
            hub,
            units,
            config: config.clone(),
        }
    }

    /// Number of units currently in the chain.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the chain has no units left.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// The unit at `index`, 0 being the westmost.
    ///
    /// # Panics
    /// If `index` is out of range.
    pub fn unit(&self, index: usize) -> &SimUnit {
        &self.units[index]
    }

    /// Blocks until every unit has converged, up to `timeout`.
    pub fn wait_converged(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.units.iter().all(SimUnit::is_converged) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Index of the unit holding the Receiver role, if any.
    pub fn receiver_index(&self) -> Option<usize> {
        self.units.iter().position(|unit| unit.state().is_receiver())
    }

    /// Clips a fresh unit onto the east end and returns its index.
    ///
    /// The unit boots into a chain that already converged, so it adopts
    /// its octave from the east end's bound broadcast.
    pub fn attach_east(&mut self) -> usize {
        let presence = Arc::new(SimPresence::new());
        if let Some(end) = self.units.last() {
            SimPresence::connect(&end.presence, &presence);
        }
        let index = self.units.len();
        let unit = SimUnit::spawn(&self.config, &self.hub, presence, format!("sim-{index}"));
        self.units.push(unit);
        index
    }

    /// Unplugs the east end and returns it, still running solo.
    ///
    /// Presence wires and the bus tap are severed together, as both run
    /// through the same board connector.
    pub fn detach_east(&mut self) -> Option<SimUnit> {
        let detached = self.units.pop()?;
        if let Some(end) = self.units.last() {
            end.presence.disconnect_east();
        }
        detached.presence.disconnect_west();
        detached.port.unplug();
        Some(detached)
    }

    /// Stops every unit and joins their tasks.
    pub fn shutdown(self) {
        for unit in self.units {
            unit.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_delivers_to_everyone_but_the_sender() {
        let hub = Arc::new(BusHub::new());
        let a = hub.attach();
        let b = hub.attach();

        a.send([1; 8]).unwrap();
        b.send([2; 8]).unwrap();

        // Each port sees only the other's frame.
        assert_eq!(a.recv().unwrap(), [2; 8]);
        assert_eq!(b.recv().unwrap(), [1; 8]);
    }

    #[test]
    fn test_slow_reader_keeps_only_a_queue_full() {
        let hub = Arc::new(BusHub::new());
        let a = hub.attach();
        let b = hub.attach();

        for i in 0..(QUEUE_CAPACITY as u8 + 4) {
            a.send([i; 8]).unwrap();
        }
        for i in 0..QUEUE_CAPACITY as u8 {
            assert_eq!(b.recv().unwrap(), [i; 8]);
        }
    }

    #[test]
    fn test_close_unblocks_a_blocked_reader() {
        let hub = Arc::new(BusHub::new());
        let port = hub.attach();
        let reader = Arc::clone(&port);
        let join = thread::spawn(move || reader.recv());
        thread::sleep(Duration::from_millis(10));

        port.close();
        assert!(join.join().unwrap().is_err());
        assert!(port.send([0; 8]).is_err());
    }

    #[test]
    fn test_closed_port_no_longer_hears_the_hub() {
        let hub = Arc::new(BusHub::new());
        let a = hub.attach();
        let b = hub.attach();
        b.close();
        // Broadcast to a detached tap must not error out the sender.
        a.send([7; 8]).unwrap();
        assert!(b.recv().is_err());
    }

    #[test]
    fn test_unplugged_port_is_isolated_both_ways() {
        let hub = Arc::new(BusHub::new());
        let a = hub.attach();
        let b = hub.attach();
        let c = hub.attach();
        b.unplug();

        // Sends from an unplugged port reach nobody but still succeed.
        b.send([5; 8]).unwrap();
        a.send([6; 8]).unwrap();
        a.send([7; 8]).unwrap();

        // c hears a's frames back to back, so b's went nowhere.
        assert_eq!(c.recv().unwrap(), [6; 8]);
        assert_eq!(c.recv().unwrap(), [7; 8]);
    }

    #[test]
    fn test_presence_wires_run_in_both_directions() {
        let west = SimPresence::new();
        let east = SimPresence::new();
        assert!(!west.sense(Side::East));

        SimPresence::connect(&west, &east);
        assert!(west.sense(Side::East));
        assert!(east.sense(Side::West));
        assert!(!west.sense(Side::West));
        assert!(!east.sense(Side::East));

        east.drive(Side::West, false);
        assert!(!west.sense(Side::East));
        assert!(east.sense(Side::West));

        west.disconnect_east();
        east.drive(Side::West, true);
        assert!(!west.sense(Side::East));
    }

    #[test]
    fn test_keys_scan_as_a_bitmap() {
        let keys = SimKeys::new();
        keys.press(0);
        keys.press(9);
        assert_eq!(keys.scan(), 0b10_0000_0001);
        keys.release(0);
        assert_eq!(keys.scan(), 0b10_0000_0000);
    }

    #[test]
    fn test_controls_clamp_and_track_loading() {
        let controls = SimControls::new();
        assert!(!controls.control(Control::Volume).loaded);

        controls.sync_rotation(Control::Volume, 99);
        let volume = controls.control(Control::Volume);
        assert!(volume.loaded);
        assert_eq!(volume.rotation, VOLUME_MAX);

        controls.turn(Control::Octave, 0);
        assert_eq!(controls.control(Control::Octave).rotation, OCTAVE_MIN);
        // A twist alone does not mark the encoder loaded.
        assert!(!controls.control(Control::Octave).loaded);

        controls.load(Control::Octave);
        assert!(controls.control(Control::Octave).loaded);

        controls.set_pressed(Control::Volume, true);
        assert!(controls.control(Control::Volume).pressed);
        assert_eq!(controls.joystick_y(), JOYSTICK_CENTRE);
    }

    #[test]
    fn test_solo_chain_boots_to_receiver() {
        let chain = Chain::start(1, &UnitConfig::simulation());
        assert!(chain.wait_converged(Duration::from_secs(2)));
        assert_eq!(chain.receiver_index(), Some(0));
        assert_eq!(chain.unit(0).state().octave(), 4);
        chain.shutdown();
    }
}
