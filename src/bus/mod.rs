//! Wire protocol codec and transport seam.
//!
//! Every unit shares one broadcast bus and one 8-byte frame format. Byte 0
//! is an ASCII tag, bytes 1..=3 carry the payload fields that tag uses and
//! the rest stay zero. [`Message`] gives the frames typed payloads;
//! [`decode`](Message::decode) refuses anything a handler could not act on
//! so garbage on the wire dies at the boundary instead of inside a task.

mod transport;

pub use transport::{BusPort, BusSender};

use crate::constants::{FRAME_LEN, NOTES_PER_OCTAVE, OCTAVE_MAX, OCTAVE_MIN};

/// Raw bus frame.
pub type Frame = [u8; FRAME_LEN];

/// Typed bus message.
///
/// Field positions on the wire: byte 1 carries octaves and chain positions,
/// byte 2 carries note indices and assign flags, byte 3 carries volume and
/// waveform settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Key pressed somewhere in the chain (`'P'`).
    Pressed {
        /// Octave the key's unit is assigned.
        octave: u8,
        /// Note index within the octave.
        note: u8,
        /// Sender's volume setting at press time.
        volume: u8,
    },
    /// Key released (`'R'`), same payload as [`Message::Pressed`].
    Released {
        /// Octave the key's unit is assigned.
        octave: u8,
        /// Note index within the octave.
        note: u8,
        /// Sender's volume setting at release time.
        volume: u8,
    },
    /// Convergence ripple step: the sender took this chain position (`'N'`).
    NewHandshake {
        /// Zero-based position from the west end.
        position: u8,
    },
    /// Convergence finished: the eastmost unit announces its position (`'F'`).
    FinalHandshake {
        /// Eastmost chain position; every unit derives its octave from it.
        length: u8,
    },
    /// Volume setting changed (`'V'`).
    Volume {
        /// New volume, 0..=8.
        volume: u8,
    },
    /// Waveform selection changed (`'W'`).
    Waveform {
        /// New waveform index, 0..=3.
        waveform: u8,
    },
    /// Chain's highest octave changed (`'H'`).
    HighestOctave {
        /// New highest octave.
        octave: u8,
        /// When set, a unit sensing only a west neighbour adopts `octave`
        /// as its own (east-end hot-plug assignment).
        assign: bool,
    },
    /// Chain's lowest octave changed (`'L'`), mirror of `HighestOctave`.
    LowestOctave {
        /// New lowest octave.
        octave: u8,
        /// West-end hot-plug assignment flag.
        assign: bool,
    },
    /// The sender claimed the Receiver role (`'T'`).
    ReceiverClaim {
        /// Octave of the new Receiver.
        octave: u8,
    },
}

impl Message {
    /// Encodes this message as a wire frame. Total.
    pub fn encode(&self) -> Frame {
        let mut frame = [0u8; FRAME_LEN];
        match *self {
            Message::Pressed { octave, note, volume } => {
                frame[0] = b'P';
                frame[1] = octave;
                frame[2] = note;
                frame[3] = volume;
            }
            Message::Released { octave, note, volume } => {
                frame[0] = b'R';
                frame[1] = octave;
                frame[2] = note;
                frame[3] = volume;
            }
            Message::NewHandshake { position } => {
                frame[0] = b'N';
                frame[1] = position;
            }
            Message::FinalHandshake { length } => {
                frame[0] = b'F';
                frame[1] = length;
            }
            Message::Volume { volume } => {
                frame[0] = b'V';
                frame[3] = volume;
            }
            Message::Waveform { waveform } => {
                frame[0] = b'W';
                frame[3] = waveform;
            }
            Message::HighestOctave { octave, assign } => {
                frame[0] = b'H';
                frame[1] = octave;
                frame[2] = assign as u8;
            }
            Message::LowestOctave { octave, assign } => {
                frame[0] = b'L';
                frame[1] = octave;
                frame[2] = assign as u8;
            }
            Message::ReceiverClaim { octave } => {
                frame[0] = b'T';
                frame[1] = octave;
            }
        }
        frame
    }

    /// Decodes a wire frame.
    ///
    /// Returns `None` for unknown tags and for note events whose payload is
    /// outside the playable range; the router drops those silently. Raw
    /// octave bytes of topology frames pass through unchecked because they
    /// carry chain positions as well as octaves.
    pub fn decode(frame: &Frame) -> Option<Message> {
        match frame[0] {
            b'P' | b'R' => {
                let (octave, note, volume) = (frame[1], frame[2], frame[3]);
                if note as usize >= NOTES_PER_OCTAVE {
                    return None;
                }
                if !(OCTAVE_MIN..=OCTAVE_MAX).contains(&octave) {
                    return None;
                }
                Some(if frame[0] == b'P' {
                    Message::Pressed { octave, note, volume }
                } else {
                    Message::Released { octave, note, volume }
                })
            }
            b'N' => Some(Message::NewHandshake { position: frame[1] }),
            b'F' => Some(Message::FinalHandshake { length: frame[1] }),
            b'V' => Some(Message::Volume { volume: frame[3] }),
            b'W' => Some(Message::Waveform { waveform: frame[3] }),
            b'H' => Some(Message::HighestOctave {
                octave: frame[1],
                assign: frame[2] != 0,
            }),
            b'L' => Some(Message::LowestOctave {
                octave: frame[1],
                assign: frame[2] != 0,
            }),
            b'T' => Some(Message::ReceiverClaim { octave: frame[1] }),
            _ => None,
        }
    }

    /// ASCII tag byte of this message.
    pub fn tag(&self) -> u8 {
        self.encode()[0]
    }
}
