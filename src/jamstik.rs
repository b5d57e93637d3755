pub mod config;
pub mod packed;
pub mod schema;

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

// Buffer limits //////////////////////////////////
pub const MIDI_MAX_BUFFER_SIZE: usize = 32768;
pub const MIDI_MAX_EVENTS: usize = 256;

// SysEx framing //////////////////////////////////
pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;
/// The device ignores the length byte but expects something there
pub const SYSEX_DUMMY_LENGTH: u8 = 0x55;
pub const VENDOR_ID: [u8; 3] = [0x00, 0x02, 0x02];

pub const SYSEX_HEADER_SIZE: usize = 5;
pub const SYSEX_TAIL_SIZE: usize = 2;
pub const NAME_SIZE: usize = 8;

pub const OPCODE_OFFSET: usize = 4;
pub const NAME_OFFSET: usize = SYSEX_HEADER_SIZE;
pub const TYPE_OFFSET: usize = NAME_OFFSET + NAME_SIZE;
pub const VALUE_OFFSET: usize = TYPE_OFFSET + 1;
pub const SCHEMA_BODY_OFFSET: usize = TYPE_OFFSET;

pub const QUERY_FRAME_SIZE: usize = SYSEX_HEADER_SIZE + NAME_SIZE + SYSEX_TAIL_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    SchemaQuery = 0x44,
    SchemaReturn = 0x45,
    ConfigReturn = 0x61,
    ConfigSet = 0x62,
    ConfigSetReturn = 0x63,
    ConfigQuery = 0x66,
    ConfigDone = 0x67,
}

// Parameter names ////////////////////////////////

/// Eight byte parameter or category name as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamName([u8; NAME_SIZE]);

impl ParamName {
    pub const ZERO: ParamName = ParamName([0; NAME_SIZE]);

    pub const fn new(bytes: [u8; NAME_SIZE]) -> Self {
        Self(bytes)
    }

    /// Exactly eight ASCII bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != NAME_SIZE || !bytes.is_ascii() {
            return None;
        }
        let mut name = [0u8; NAME_SIZE];
        name.copy_from_slice(bytes);
        return Some(Self(name));
    }

    /// Short names are padded with underscores the way the device does.
    pub fn padded(name: &str) -> Option<Self> {
        if name.len() > NAME_SIZE || !name.is_ascii() {
            return None;
        }
        let mut bytes = [b'_'; NAME_SIZE];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        return Some(Self(bytes));
    }

    pub fn as_bytes(&self) -> &[u8; NAME_SIZE] {
        &self.0
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for byte in self.0 {
            if byte.is_ascii_graphic() || byte == b' ' {
                write!(f, "{}", byte as char)?;
            } else {
                write!(f, "\\x{:02x}", byte)?;
            }
        }
        Ok(())
    }
}

pub const MPE_MODE: ParamName = ParamName::new(*b"MPE_MODE");
pub const SINGLECH: ParamName = ParamName::new(*b"SINGLECH");
pub const MIDICHAN: ParamName = ParamName::new(*b"MIDICHAN");
pub const PTCHBSEM: ParamName = ParamName::new(*b"PTCHBSEM");
pub const PTCHBCEN: ParamName = ParamName::new(*b"PTCHBCEN");

// MIDI ///////////////////////////////////////////

/* Channel voice messages */
pub const MIDI_NOTE_OFF: u8 = 0x80;
pub const MIDI_NOTE_ON: u8 = 0x90;
pub const MIDI_POLY_KEY_PRESSURE: u8 = 0xA0;
pub const MIDI_CONTROL_CHANGE: u8 = 0xB0;
pub const MIDI_PROGRAM_CHANGE: u8 = 0xC0;
pub const MIDI_CHANNEL_PRESSURE: u8 = 0xD0;
pub const MIDI_PITCH_BEND: u8 = 0xE0;
pub const MIDI_SYSTEM: u8 = 0xF0;

pub const MIDI_PITCH_BEND_CENTER: i32 = 8192;

/* Control change numbers */
pub const CC_DATA_ENTRY_MSB: u8 = 6;
pub const CC_EXPRESSION_MSB: u8 = 11;
pub const CC_DATA_ENTRY_LSB: u8 = 38;
pub const CC_EXPRESSION_LSB: u8 = 43;
pub const CC_RPN_LSB: u8 = 100;
pub const CC_RPN_MSB: u8 = 101;

pub const GUITAR_STRINGS: usize = 6;
pub const MIDI_CHANNELS: usize = 16;
