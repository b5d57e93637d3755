use crate::{
    error::{AppError, ErrorType},
    guitar::{GuitarModel, note_name},
    jamstik::{
        CC_DATA_ENTRY_LSB, CC_DATA_ENTRY_MSB, CC_EXPRESSION_LSB, CC_EXPRESSION_MSB, CC_RPN_LSB,
        CC_RPN_MSB, MIDI_CHANNEL_PRESSURE, MIDI_CONTROL_CHANGE, MIDI_NOTE_OFF, MIDI_NOTE_ON,
        MIDI_PITCH_BEND, MIDI_PITCH_BEND_CENTER, MIDI_POLY_KEY_PRESSURE, MIDI_PROGRAM_CHANGE,
        MIDI_SYSTEM,
    },
    rpn::{RpnChange, RpnTracker},
};

type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMessage {
    NoteOff { channel: u8, note: u8, velocity: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    PolyPressure { channel: u8, note: u8, pressure: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, pressure: u8 },
    /// Centered value, -8192..8191
    PitchBend { channel: u8, value: i32 },
}

fn expect_length(event: &[u8], length: usize) -> Result<()> {
    if event.len() < length {
        return Err(AppError::new(
            ErrorType::FramingError,
            format!(
                "Status {:02x} needs {} bytes, got {}",
                event[0],
                length,
                event.len()
            ),
        ));
    }
    return Ok(());
}

impl ChannelMessage {
    pub fn parse(event: &[u8]) -> Result<Self> {
        let Some(&status) = event.first() else {
            return Err(AppError::new(
                ErrorType::FramingError,
                "Empty event".to_string(),
            ));
        };
        let channel = status & 0x0F;
        let kind = status & 0xF0;
        let length = match kind {
            MIDI_PROGRAM_CHANGE | MIDI_CHANNEL_PRESSURE => 2,
            MIDI_NOTE_OFF | MIDI_NOTE_ON | MIDI_POLY_KEY_PRESSURE | MIDI_CONTROL_CHANGE
            | MIDI_PITCH_BEND => 3,
            MIDI_SYSTEM => {
                return Err(AppError::new(
                    ErrorType::FramingError,
                    format!("System message {:02x} is not a channel message", status),
                ));
            }
            _ => {
                return Err(AppError::new(
                    ErrorType::FramingError,
                    format!("Stray data byte {:02x}", status),
                ));
            }
        };
        expect_length(event, length)?;

        let message = match kind {
            MIDI_NOTE_OFF => ChannelMessage::NoteOff {
                channel,
                note: event[1],
                velocity: event[2],
            },
            MIDI_NOTE_ON => ChannelMessage::NoteOn {
                channel,
                note: event[1],
                velocity: event[2],
            },
            MIDI_POLY_KEY_PRESSURE => ChannelMessage::PolyPressure {
                channel,
                note: event[1],
                pressure: event[2],
            },
            MIDI_CONTROL_CHANGE => ChannelMessage::ControlChange {
                channel,
                controller: event[1],
                value: event[2],
            },
            MIDI_PROGRAM_CHANGE => ChannelMessage::ProgramChange {
                channel,
                program: event[1],
            },
            MIDI_CHANNEL_PRESSURE => ChannelMessage::ChannelPressure {
                channel,
                pressure: event[1],
            },
            _ => {
                let raw = ((event[2] as i32 & 0x7F) << 7) | (event[1] as i32 & 0x7F);
                ChannelMessage::PitchBend {
                    channel,
                    value: raw - MIDI_PITCH_BEND_CENTER,
                }
            }
        };
        return Ok(message);
    }
}

/// Turns the guitar's channel messages into GuitarModel updates
#[derive(Debug, Clone, Default)]
pub struct MidiDecoder {
    rpn: RpnTracker,
}

impl MidiDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rpn(&self) -> &RpnTracker {
        &self.rpn
    }

    pub fn handle(&mut self, event: &[u8], guitar: &mut GuitarModel) {
        let message = match ChannelMessage::parse(event) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("Dropped MIDI event {}: {}", hex::encode(event), e.message);
                return;
            }
        };

        let routed = match message {
            ChannelMessage::NoteOn {
                channel,
                note,
                velocity: 0,
            } => guitar.note_off(channel, note, 0),
            ChannelMessage::NoteOn {
                channel,
                note,
                velocity,
            } => guitar.note_on(channel, note, velocity),
            ChannelMessage::NoteOff {
                channel,
                note,
                velocity,
            } => guitar.note_off(channel, note, velocity),
            ChannelMessage::ControlChange {
                channel,
                controller,
                value,
            } => self.control_change(channel, controller, value, guitar),
            ChannelMessage::PitchBend { channel, value } => guitar.bend(channel, value),
            ChannelMessage::PolyPressure {
                channel,
                note,
                pressure,
            } => {
                log::debug!(
                    "Poly pressure ({}) {} {}",
                    channel,
                    note_name(note),
                    pressure
                );
                Ok(())
            }
            ChannelMessage::ProgramChange { channel, program } => {
                log::debug!("Program change ({}) {}", channel, program);
                Ok(())
            }
            ChannelMessage::ChannelPressure { channel, pressure } => {
                log::debug!("Channel pressure ({}) {}", channel, pressure);
                Ok(())
            }
        };
        if let Err(e) = routed {
            log::debug!("Dropped MIDI event {}: {}", hex::encode(event), e.message);
        }
    }

    fn control_change(
        &mut self,
        channel: u8,
        controller: u8,
        value: u8,
        guitar: &mut GuitarModel,
    ) -> Result<()> {
        match controller {
            CC_RPN_MSB | CC_RPN_LSB | CC_DATA_ENTRY_MSB | CC_DATA_ENTRY_LSB => {
                match self.rpn.control_change(channel, controller, value) {
                    Some(RpnChange::PitchBendSensitivity {
                        semitones, cents, ..
                    }) => guitar.set_bend_range(semitones as u16, cents as u16),
                    Some(change) => log::debug!("RPN {:?}", change),
                    None => {}
                }
                return Ok(());
            }
            CC_EXPRESSION_MSB => return guitar.expression_msb(channel, value),
            CC_EXPRESSION_LSB => return guitar.expression_lsb(channel, value),
            _ => {
                log::debug!("Control change ({}) {} = {}", channel, controller, value);
                return Ok(());
            }
        }
    }
}
