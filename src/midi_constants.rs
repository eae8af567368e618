//! Audio class / MIDI streaming 1.0 codes used by the descriptor image.

// Interface association, device level
pub const MISC_DEVICE_CLASS: u8 = 0xEF;
pub const COMMON_SUBCLASS: u8 = 0x02;
pub const IAD_PROTOCOL: u8 = 0x01;

// Standard descriptor types
pub const DEVICE: u8 = 0x01;
pub const CONFIGURATION: u8 = 0x02;
pub const STRING: u8 = 0x03;
pub const INTERFACE: u8 = 0x04;
pub const ENDPOINT: u8 = 0x05;
pub const INTERFACE_ASSOCIATION: u8 = 0x0B;

// Audio class
pub const AUDIO: u8 = 0x01;
pub const MIDISTREAMING: u8 = 0x03;
pub const PROTOCOL_UNDEFINED: u8 = 0x00;

// Class-specific descriptor types
pub const CS_INTERFACE: u8 = 0x24;
pub const CS_ENDPOINT: u8 = 0x25;

// MS interface descriptor subtypes
pub const MS_HEADER: u8 = 0x01;
pub const MIDI_IN_JACK: u8 = 0x02;
pub const MIDI_OUT_JACK: u8 = 0x03;

// MS endpoint descriptor subtypes
pub const MS_GENERAL: u8 = 0x01;

// MIDIStreaming 1.0, BCD
pub const MSC_REVISION: [u8; 2] = (0x0100 as u16).to_le_bytes();

// Jack types
pub const EMBEDDED: u8 = 0x01;
pub const EXTERNAL: u8 = 0x02;

// Descriptor lengths, header included
pub const DEVICE_LEN: usize = 18;
pub const CONFIGURATION_LEN: usize = 9;
pub const IAD_LEN: usize = 8;
pub const INTERFACE_LEN: usize = 9;
pub const MS_HEADER_LEN: usize = 7;
pub const MIDI_IN_JACK_LEN: usize = 6;
// USB 2.0 form; the 9-byte audio-class variant is not used.
pub const ENDPOINT_LEN: usize = 7;

// Transfer types
pub const BULK: u8 = 0x02;

// Language table
pub const ENGLISH_US: u16 = 0x0409;

// USB-MIDI event packet code index numbers (USB MIDI 1.0, table 4-1)
pub const CIN_MISC: u8 = 0x0;
pub const CIN_CABLE_EVENT: u8 = 0x1;
pub const CIN_SYSCOMMON_2: u8 = 0x2;
pub const CIN_SYSCOMMON_3: u8 = 0x3;
pub const CIN_SYSEX_START: u8 = 0x4;
pub const CIN_SYSEX_END_1: u8 = 0x5;
pub const CIN_SYSEX_END_2: u8 = 0x6;
pub const CIN_SYSEX_END_3: u8 = 0x7;
pub const CIN_NOTE_OFF: u8 = 0x8;
pub const CIN_NOTE_ON: u8 = 0x9;
pub const CIN_POLY_PRESSURE: u8 = 0xA;
pub const CIN_CONTROL_CHANGE: u8 = 0xB;
pub const CIN_PROGRAM_CHANGE: u8 = 0xC;
pub const CIN_CHANNEL_PRESSURE: u8 = 0xD;
pub const CIN_PITCH_BEND: u8 = 0xE;
pub const CIN_SINGLE_BYTE: u8 = 0xF;
