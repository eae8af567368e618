//! Synthesis-domain side of the stream.
//!
//! The bridge carries plain bytes with transfer boundaries. Here they are
//! regrouped into 4-byte USB-MIDI event packets and decoded into channel
//! messages for a [`Synth`].

use crate::bridge::{BridgeReader, StreamWord};
use crate::midi_constants::*;

/// One USB-MIDI event packet: cable number and code index number in the
/// header byte, then up to three MIDI bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventPacket {
    pub cable: u8,
    pub code_index: u8,
    pub midi: [u8; 3],
}

impl EventPacket {
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self {
            cable: bytes[0] >> 4,
            code_index: bytes[0] & 0x0F,
            midi: [bytes[1], bytes[2], bytes[3]],
        }
    }

    pub const fn to_bytes(self) -> [u8; 4] {
        [
            (self.cable << 4) | (self.code_index & 0x0F),
            self.midi[0],
            self.midi[1],
            self.midi[2],
        ]
    }

    /// Number of meaningful MIDI bytes for the code index number.
    pub const fn midi_len(&self) -> usize {
        match self.code_index {
            CIN_MISC | CIN_CABLE_EVENT => 0,
            CIN_SYSEX_END_1 | CIN_SINGLE_BYTE => 1,
            CIN_SYSCOMMON_2 | CIN_SYSEX_END_2 | CIN_PROGRAM_CHANGE | CIN_CHANNEL_PRESSURE => 2,
            _ => 3,
        }
    }

    pub fn message(&self) -> Option<MidiMessage> {
        MidiMessage::from_packet(self)
    }

    /// Encodes `message`. Channels wrap to 4 bits and data bytes to 7 bits, so
    /// the status nibble always matches the code index.
    pub fn from_message(cable: u8, message: &MidiMessage) -> Self {
        let voice = |kind: u8, channel: u8, data1: u8, data2: u8| {
            (kind, [(kind << 4) | (channel & 0x0F), data1 & 0x7F, data2 & 0x7F])
        };
        let (code_index, midi) = match *message {
            MidiMessage::NoteOff { channel, note, velocity } => voice(CIN_NOTE_OFF, channel, note, velocity),
            MidiMessage::NoteOn { channel, note, velocity } => voice(CIN_NOTE_ON, channel, note, velocity),
            MidiMessage::PolyPressure { channel, note, pressure } => {
                voice(CIN_POLY_PRESSURE, channel, note, pressure)
            }
            MidiMessage::ControlChange { channel, control, value } => {
                voice(CIN_CONTROL_CHANGE, channel, control, value)
            }
            MidiMessage::ProgramChange { channel, program } => voice(CIN_PROGRAM_CHANGE, channel, program, 0),
            MidiMessage::ChannelPressure { channel, pressure } => voice(CIN_CHANNEL_PRESSURE, channel, pressure, 0),
            MidiMessage::PitchBend { channel, value } => {
                voice(CIN_PITCH_BEND, channel, value as u8, (value >> 7) as u8)
            }
            MidiMessage::System { code_index, bytes } => (code_index, bytes),
        };
        Self {
            cable: cable & 0x0F,
            code_index,
            midi,
        }
    }
}

/// Decoded event. Channels are 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MidiMessage {
    NoteOff { channel: u8, note: u8, velocity: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    PolyPressure { channel: u8, note: u8, pressure: u8 },
    ControlChange { channel: u8, control: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, pressure: u8 },
    /// 14 bits, centre at 0x2000.
    PitchBend { channel: u8, value: u16 },
    /// System common, system exclusive and real-time bytes, passed through.
    System { code_index: u8, bytes: [u8; 3] },
}

impl MidiMessage {
    pub const PITCH_BEND_CENTER: u16 = 0x2000;

    pub fn from_packet(packet: &EventPacket) -> Option<Self> {
        let [status, data1, data2] = packet.midi;
        match packet.code_index {
            CIN_MISC | CIN_CABLE_EVENT => return None,
            CIN_NOTE_OFF..=CIN_PITCH_BEND => {}
            code_index => {
                return Some(MidiMessage::System {
                    code_index,
                    bytes: packet.midi,
                })
            }
        }

        // Channel voice: the status byte must agree with the code index.
        if status >> 4 != packet.code_index {
            return None;
        }
        let channel = status & 0x0F;
        let message = match packet.code_index {
            CIN_NOTE_ON if data2 > 0 => MidiMessage::NoteOn {
                channel,
                note: data1,
                velocity: data2,
            },
            CIN_NOTE_ON => MidiMessage::NoteOff {
                channel,
                note: data1,
                velocity: 0,
            },
            CIN_NOTE_OFF => MidiMessage::NoteOff {
                channel,
                note: data1,
                velocity: data2,
            },
            CIN_POLY_PRESSURE => MidiMessage::PolyPressure {
                channel,
                note: data1,
                pressure: data2,
            },
            CIN_CONTROL_CHANGE => MidiMessage::ControlChange {
                channel,
                control: data1,
                value: data2,
            },
            CIN_PROGRAM_CHANGE => MidiMessage::ProgramChange { channel, program: data1 },
            CIN_CHANNEL_PRESSURE => MidiMessage::ChannelPressure {
                channel,
                pressure: data1,
            },
            _ => MidiMessage::PitchBend {
                channel,
                value: ((data2 as u16 & 0x7F) << 7) | (data1 as u16 & 0x7F),
            },
        };
        Some(message)
    }
}

/// Regroups stream words into event packets.
///
/// Every word flagged `first` starts a new packet; bytes of an unfinished
/// packet are discarded at that point, and at the end of a transfer.
#[derive(Debug, Default)]
pub struct PacketAssembler {
    buf: [u8; 4],
    len: usize,
    discarded: u32,
}

impl PacketAssembler {
    pub const fn new() -> Self {
        Self {
            buf: [0; 4],
            len: 0,
            discarded: 0,
        }
    }

    pub fn push(&mut self, word: StreamWord) -> Option<EventPacket> {
        if word.first && self.len != 0 {
            self.discard();
        }
        self.buf[self.len] = word.data;
        self.len += 1;
        if self.len == self.buf.len() {
            self.len = 0;
            return Some(EventPacket::from_bytes(self.buf));
        }
        if word.last {
            self.discard();
        }
        None
    }

    /// Partial packets thrown away so far.
    pub fn discarded(&self) -> u32 {
        self.discarded
    }

    fn discard(&mut self) {
        debug!("discarding {} byte partial packet", self.len);
        self.len = 0;
        self.discarded = self.discarded.wrapping_add(1);
    }
}

/// The sound engine. It runs in the synthesis domain and must not block.
pub trait Synth {
    fn handle(&mut self, message: MidiMessage);
}

impl<F: FnMut(MidiMessage)> Synth for F {
    fn handle(&mut self, message: MidiMessage) {
        (*self)(message)
    }
}

/// Feeds every message arriving on `reader` to `synth`.
pub async fn run_synth<const N: usize, S: Synth>(reader: &mut BridgeReader<'_, N>, synth: &mut S) -> ! {
    let mut assembler = PacketAssembler::new();
    loop {
        let word = reader.read_word().await;
        let Some(packet) = assembler.push(word) else {
            continue;
        };
        match packet.message() {
            Some(message) => synth.handle(message),
            None => trace!("ignoring packet {}", packet),
        }
    }
}
