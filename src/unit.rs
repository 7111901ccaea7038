//! Task wiring and lifecycle.
//!
//! One [`Unit`] stands for one keyboard board. [`Unit::spawn`] wires the
//! peripherals to the firmware's tasks, each on its own thread: topology
//! convergence, frame routing, note playback, bus transmit, key scanning,
//! pitch bend and the display. The returned [`UnitHandle`] owns the threads
//! and tears them down in an order that unblocks every loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::bus::{BusPort, BusSender, Message};
use crate::constants::{NOTES_PER_OCTAVE, QUEUE_CAPACITY};
use crate::engine::{AudioEngine, RunMode};
use crate::io::{Control, ControlSurface, DisplayFrame, DisplaySink, KeyScanner, PresenceLines};
use crate::router::{MessageRouter, VoiceEvent};
use crate::state::UnitState;
use crate::topology::{ScanGate, TopologyController};
use crate::voices::{Voice, VoiceRegistry};
use crate::{Result, SynthError};

/// Task periods and settle times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingProfile {
    /// Key matrix scan period.
    pub scan_period: Duration,
    /// Joystick sampling period for pitch bend.
    pub bend_period: Duration,
    /// Display refresh period.
    pub display_period: Duration,
    /// Presence poll period of the convergence loop.
    pub topology_tick: Duration,
    /// Settle time before the first presence poll at boot.
    pub boot_grace: Duration,
    /// How long a sensed neighbour change must hold before it applies.
    pub connection_debounce: Duration,
    /// Settle time granted to a freshly attached neighbour before the
    /// chain-wide settings are re-sent for it.
    pub power_settle: Duration,
    /// Give up on the chain and self-assign solo after this long without
    /// convergence. `None` waits forever.
    pub convergence_timeout: Option<Duration>,
}

impl TimingProfile {
    /// The periods the board firmware runs at.
    pub fn hardware() -> Self {
        TimingProfile {
            scan_period: Duration::from_millis(20),
            bend_period: Duration::from_millis(20),
            display_period: Duration::from_millis(100),
            topology_tick: Duration::from_millis(50),
            boot_grace: Duration::from_millis(500),
            connection_debounce: Duration::from_millis(10),
            power_settle: Duration::from_millis(1000),
            convergence_timeout: None,
        }
    }

    /// Compressed periods so an in-memory chain converges in milliseconds.
    pub fn simulation() -> Self {
        TimingProfile {
            scan_period: Duration::from_millis(1),
            bend_period: Duration::from_millis(1),
            display_period: Duration::from_millis(5),
            topology_tick: Duration::from_millis(1),
            boot_grace: Duration::from_millis(2),
            connection_debounce: Duration::from_millis(5),
            power_settle: Duration::from_millis(1),
            convergence_timeout: Some(Duration::from_millis(250)),
        }
    }
}

impl Default for TimingProfile {
    fn default() -> Self {
        TimingProfile::hardware()
    }
}

/// Everything a unit needs to know that is not a peripheral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Task periods and settle times.
    pub timing: TimingProfile,
    /// How audio leaves the engine.
    pub run_mode: RunMode,
}

impl UnitConfig {
    /// Hardware timing, real-time audio.
    pub fn hardware() -> Self {
        UnitConfig {
            timing: TimingProfile::hardware(),
            run_mode: RunMode::Realtime,
        }
    }

    /// Simulation timing, real-time audio.
    pub fn simulation() -> Self {
        UnitConfig {
            timing: TimingProfile::simulation(),
            run_mode: RunMode::Realtime,
        }
    }

    /// Loads a config from a JSON file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        serde_json::from_reader(file)
            .map_err(|e| SynthError::ConfigError(format!("{}: {e}", path.display())))
    }
}

impl Default for UnitConfig {
    fn default() -> Self {
        UnitConfig::hardware()
    }
}

/// Hardware collaborators handed to [`Unit::spawn`].
pub struct Peripherals {
    /// Key matrix.
    pub keys: Arc<dyn KeyScanner>,
    /// Rotary encoders plus the joystick.
    pub controls: Arc<dyn ControlSurface>,
    /// Status display.
    pub display: Arc<dyn DisplaySink>,
    /// Per-side neighbour presence lines.
    pub presence: Arc<dyn PresenceLines>,
    /// The shared broadcast bus.
    pub port: Arc<dyn BusPort>,
}

/// One keyboard board's firmware, assembled but not yet running.
pub struct Unit {
    config: UnitConfig,
    peripherals: Peripherals,
}

impl Unit {
    /// Pairs a config with its peripherals.
    pub fn new(config: &UnitConfig, peripherals: Peripherals) -> Self {
        Unit {
            config: config.clone(),
            peripherals,
        }
    }

    /// Starts every task and returns the handle that owns them.
    pub fn spawn(self) -> UnitHandle {
        let timing = self.config.timing;
        let state = Arc::new(UnitState::new());
        let voices = Arc::new(VoiceRegistry::new());
        let scan_gate = Arc::new(ScanGate::new());
        let running = Arc::new(AtomicBool::new(true));
        let port = self.peripherals.port;

        let (outbound, outbound_rx) = mpsc::sync_channel::<Message>(QUEUE_CAPACITY);
        let (voice_lane, voice_rx) = mpsc::sync_channel::<VoiceEvent>(QUEUE_CAPACITY);

        // One permit pool per unit; the topology's direct sends and the
        // transmit task draw from the same three permits.
        let sender = BusSender::new(Arc::clone(&port));

        let topology = Arc::new(TopologyController::new(
            Arc::clone(&state),
            Arc::clone(&self.peripherals.controls),
            Arc::clone(&self.peripherals.presence),
            sender.clone(),
            outbound.clone(),
            Arc::clone(&scan_gate),
            timing.clone(),
        ));
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&state),
            Arc::clone(&self.peripherals.controls),
            Arc::clone(&topology),
            voice_lane,
            outbound.clone(),
        ));
        let engine = AudioEngine::new(Arc::clone(&voices), Arc::clone(&state));

        let mut threads = Vec::new();

        {
            let topology = Arc::clone(&topology);
            let running = Arc::clone(&running);
            threads.push(thread::spawn(move || topology.run(&running)));
        }
        {
            let router = Arc::clone(&router);
            let port = Arc::clone(&port);
            threads.push(thread::spawn(move || router.run(&*port)));
        }
        {
            let running = Arc::clone(&running);
            let voices = Arc::clone(&voices);
            let state = Arc::clone(&state);
            let poll = timing.topology_tick;
            threads.push(thread::spawn(move || {
                player_loop(&running, &voice_rx, &voices, &state, poll)
            }));
        }
        {
            let running = Arc::clone(&running);
            let state = Arc::clone(&state);
            let poll = timing.topology_tick;
            threads.push(thread::spawn(move || {
                transmit_loop(&running, &outbound_rx, &sender, &state, poll)
            }));
        }
        {
            let scan = KeyScanTask {
                keys: self.peripherals.keys,
                controls: Arc::clone(&self.peripherals.controls),
                presence: Arc::clone(&self.peripherals.presence),
                state: Arc::clone(&state),
                router,
                outbound,
                topology: Arc::clone(&topology),
                scan_gate: Arc::clone(&scan_gate),
                timing: timing.clone(),
            };
            let running = Arc::clone(&running);
            threads.push(thread::spawn(move || scan.run(&running)));
        }
        {
            let running = Arc::clone(&running);
            let controls = Arc::clone(&self.peripherals.controls);
            let voices = Arc::clone(&voices);
            let period = timing.bend_period;
            threads.push(thread::spawn(move || {
                while running.load(Ordering::Relaxed) {
                    thread::sleep(period);
                    voices.apply_bend(controls.joystick_y());
                }
            }));
        }
        {
            let running = Arc::clone(&running);
            let display = self.peripherals.display;
            let state = Arc::clone(&state);
            let voices = Arc::clone(&voices);
            let period = timing.display_period;
            threads.push(thread::spawn(move || {
                while running.load(Ordering::Relaxed) {
                    thread::sleep(period);
                    display.render(&DisplayFrame::gather(&state, &voices));
                }
            }));
        }

        UnitHandle {
            state,
            voices,
            engine,
            topology,
            scan_gate,
            running,
            port,
            threads,
        }
    }
}

/// A running unit: shared state plus the threads driving it.
pub struct UnitHandle {
    state: Arc<UnitState>,
    voices: Arc<VoiceRegistry>,
    engine: AudioEngine,
    topology: Arc<TopologyController>,
    scan_gate: Arc<ScanGate>,
    running: Arc<AtomicBool>,
    port: Arc<dyn BusPort>,
    threads: Vec<JoinHandle<()>>,
}

impl UnitHandle {
    /// Shared unit state.
    pub fn state(&self) -> &UnitState {
        &self.state
    }

    /// Active-voice registry.
    pub fn voices(&self) -> &VoiceRegistry {
        &self.voices
    }

    /// The unit's sample source.
    pub fn engine(&self) -> &AudioEngine {
        &self.engine
    }

    /// Whether topology has assigned this unit an octave and role.
    pub fn is_converged(&self) -> bool {
        self.topology.is_converged()
    }

    /// Stops every task and joins the threads.
    ///
    /// Order matters: clear `running` first, then open the scan gate so a
    /// still-gated scan thread wakes, then close the port so the router's
    /// blocking receive returns.
    pub fn shutdown(mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.scan_gate.open();
        self.port.close();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for UnitHandle {
    fn drop(&mut self) {
        // Shutdown already drained the threads; this covers a dropped
        // handle, where the threads must still be told to stop.
        self.running.store(false, Ordering::Relaxed);
        self.scan_gate.open();
        self.port.close();
    }
}

fn player_loop(
    running: &AtomicBool,
    lane: &Receiver<VoiceEvent>,
    voices: &VoiceRegistry,
    state: &UnitState,
    poll: Duration,
) {
    while running.load(Ordering::Relaxed) {
        match lane.recv_timeout(poll) {
            Ok(event) => {
                // The role can flip between enqueue and dequeue; a relay
                // never sounds notes.
                if !state.is_receiver() {
                    continue;
                }
                match event {
                    VoiceEvent::Pressed(voice) => voices.press(voice),
                    VoiceEvent::Released(voice) => voices.release(voice),
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn transmit_loop(
    running: &AtomicBool,
    outbound: &Receiver<Message>,
    sender: &BusSender,
    state: &UnitState,
    poll: Duration,
) {
    while running.load(Ordering::Relaxed) {
        match outbound.recv_timeout(poll) {
            Ok(message) => {
                if state.connections().is_empty() {
                    log::trace!("no neighbours, dropping '{}' frame", message.tag() as char);
                    continue;
                }
                if let Err(err) = sender.send(&message) {
                    log::debug!("bus send failed: {err}");
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// The key-scan task: keys, encoders, the claim button and the debounced
/// neighbour watch, all on one periodic loop.
struct KeyScanTask {
    keys: Arc<dyn KeyScanner>,
    controls: Arc<dyn ControlSurface>,
    presence: Arc<dyn PresenceLines>,
    state: Arc<UnitState>,
    router: Arc<MessageRouter>,
    outbound: SyncSender<Message>,
    topology: Arc<TopologyController>,
    scan_gate: Arc<ScanGate>,
    timing: TimingProfile,
}

impl KeyScanTask {
    fn run(&self, running: &AtomicBool) {
        // Key events mean nothing until the unit knows its octave.
        self.scan_gate.wait();
        if !running.load(Ordering::Relaxed) {
            return;
        }

        let mut prev_keys: u16 = 0;
        let mut prev_sensed = self.topology.refresh_connections();
        let mut pending_since: Option<Instant> = None;
        let mut claim_held = false;

        while running.load(Ordering::Relaxed) {
            thread::sleep(self.timing.scan_period);

            let keys = self.keys.scan();
            let changed = keys ^ prev_keys;
            if changed != 0 {
                let octave = self.state.octave();
                let volume = self.state.volume();
                for note in 0..NOTES_PER_OCTAVE as u8 {
                    let bit = 1u16 << note;
                    if changed & bit == 0 {
                        continue;
                    }
                    let voice = Voice::new(note, octave);
                    let event = if keys & bit != 0 {
                        VoiceEvent::Pressed(voice)
                    } else {
                        VoiceEvent::Released(voice)
                    };
                    self.router.route_local(event, volume);
                }
                prev_keys = keys;
                self.state.set_keys(keys);
            }

            // Encoder deltas are judged against the shared state, so a
            // rotation that arrived as a bus sync never echoes back out.
            let waveform = self.controls.control(Control::Waveform);
            if waveform.loaded && waveform.rotation != self.state.waveform_index() {
                self.state.set_waveform(waveform.rotation);
                let _ = self.outbound.send(Message::Waveform { waveform: waveform.rotation });
            }
            let octave = self.controls.control(Control::Octave);
            if octave.loaded && octave.rotation != self.state.octave() {
                // A local preference: the octave knob is never broadcast.
                self.state.set_octave(octave.rotation);
            }
            let volume = self.controls.control(Control::Volume);
            if volume.loaded && volume.rotation != self.state.volume() {
                self.state.set_volume(volume.rotation);
                let _ = self.outbound.send(Message::Volume { volume: volume.rotation });
            }

            // The volume encoder's push switch claims the Receiver role.
            if volume.pressed && !claim_held && !self.state.is_receiver() {
                log::info!("claim button pressed, taking the receiver role");
                let _ = self.outbound.send(Message::ReceiverClaim {
                    octave: self.state.octave(),
                });
                self.state.set_receiver(true);
            }
            claim_held = volume.pressed;

            // Neighbour watch: a change must hold for the debounce window
            // before it is applied, so connector chatter coalesces.
            let sensed = self.presence.mask();
            if sensed != prev_sensed {
                pending_since = Some(Instant::now());
                prev_sensed = sensed;
            }
            if let Some(since) = pending_since {
                if sensed == self.state.connections() {
                    pending_since = None;
                } else if since.elapsed() >= self.timing.connection_debounce {
                    self.topology.update_connections(sensed);
                    pending_since = None;
                }
            }
        }
    }
}
