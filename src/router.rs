//! Frame dispatch and role-based routing.
//!
//! One router task per unit drains the bus port, decodes each frame and
//! hands it to the component that owns the tag. Note events fan into the
//! voice lane only on the Receiver; every other unit already relayed its
//! keys onto the bus, so re-forwarding a received note event would echo it
//! around the broadcast bus forever.

use std::sync::mpsc::SyncSender;
use std::sync::Arc;

use crate::bus::{BusPort, Message};
use crate::io::{Control, ControlSurface};
use crate::state::UnitState;
use crate::topology::TopologyController;
use crate::voices::Voice;

/// A key event on its way to the voice registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceEvent {
    /// Start sounding the voice.
    Pressed(Voice),
    /// Stop sounding the voice.
    Released(Voice),
}

/// Routes decoded bus traffic and local key events.
pub struct MessageRouter {
    state: Arc<UnitState>,
    controls: Arc<dyn ControlSurface>,
    topology: Arc<TopologyController>,
    voice_lane: SyncSender<VoiceEvent>,
    outbound: SyncSender<Message>,
}

impl MessageRouter {
    /// Router over the unit's dispatch targets.
    pub fn new(
        state: Arc<UnitState>,
        controls: Arc<dyn ControlSurface>,
        topology: Arc<TopologyController>,
        voice_lane: SyncSender<VoiceEvent>,
        outbound: SyncSender<Message>,
    ) -> Self {
        MessageRouter {
            state,
            controls,
            topology,
            voice_lane,
            outbound,
        }
    }

    /// Inbound loop: drains the port until it closes at shutdown.
    pub fn run(&self, port: &dyn BusPort) {
        while let Ok(frame) = port.recv() {
            match Message::decode(&frame) {
                Some(message) => self.dispatch(message),
                None => log::trace!("dropping undecodable frame {frame:?}"),
            }
        }
    }

    /// Dispatches one decoded bus message.
    pub fn dispatch(&self, message: Message) {
        match message {
            Message::Pressed { octave, note, .. } => {
                self.route_note(VoiceEvent::Pressed(Voice::new(note, octave)));
            }
            Message::Released { octave, note, .. } => {
                self.route_note(VoiceEvent::Released(Voice::new(note, octave)));
            }
            Message::NewHandshake { position } => self.topology.on_new_handshake(position),
            Message::FinalHandshake { length } => self.topology.on_final_handshake(length),
            Message::Volume { volume } => {
                self.state.set_volume(volume);
                self.controls.sync_rotation(Control::Volume, volume);
            }
            Message::Waveform { waveform } => {
                self.state.set_waveform(waveform);
                self.controls.sync_rotation(Control::Waveform, waveform);
            }
            Message::HighestOctave { octave, assign } => {
                self.topology.on_highest_octave(octave, assign);
            }
            Message::LowestOctave { octave, assign } => {
                self.topology.on_lowest_octave(octave, assign);
            }
            Message::ReceiverClaim { octave } => {
                self.state.set_receiver(false);
                self.state.set_receiver_octave(octave);
            }
        }
    }

    fn route_note(&self, event: VoiceEvent) {
        if self.state.is_receiver() {
            let _ = self.voice_lane.send(event);
        } else {
            log::trace!("not the receiver, dropping {event:?}");
        }
    }

    /// Routes a local key edge by role: the Receiver plays it itself,
    /// a relay encodes it for the bus. `volume` rides along in the frame.
    pub fn route_local(&self, event: VoiceEvent, volume: u8) {
        if self.state.is_receiver() {
            let _ = self.voice_lane.send(event);
        } else {
            let message = match event {
                VoiceEvent::Pressed(voice) => Message::Pressed {
                    octave: voice.octave,
                    note: voice.note,
                    volume,
                },
                VoiceEvent::Released(voice) => Message::Released {
                    octave: voice.octave,
                    note: voice.note,
                    volume,
                },
            };
            let _ = self.outbound.send(message);
        }
    }
}
