use std::fmt;

use crate::error::{AppError, ErrorType};
use crate::jamstik::{
    GUITAR_STRINGS, MIDI_PITCH_BEND_CENTER, MIDICHAN, MPE_MODE, PTCHBCEN, PTCHBSEM, ParamName,
    SINGLECH, packed::PackedValue,
};

type Result<T> = std::result::Result<T, AppError>;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Note number to name, middle C being C4
pub fn note_name(note: u8) -> String {
    let octave = (note / 12) as i32 - 1;
    format!("{}{}", NOTE_NAMES[(note % 12) as usize], octave)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuitarMode {
    SingleChannel,
    StringPerChannel,
    Mpe,
}

impl fmt::Display for GuitarMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            GuitarMode::SingleChannel => "Single Channel",
            GuitarMode::StringPerChannel => "Multichannel",
            GuitarMode::Mpe => "MPE",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuitarString {
    pub note: Option<u8>,
    pub velocity: u8,
    /// Pitch bend scaled to the configured bend range
    pub bend: i32,
    pub expression: u16,
}

/// What the guitar is currently playing, per string
#[derive(Debug, Clone)]
pub struct GuitarModel {
    mpe: bool,
    single_channel: bool,
    first_string_channel: u8,
    bend_range_semitones: u16,
    bend_range_cents: u16,
    strings: [GuitarString; GUITAR_STRINGS],
}

impl Default for GuitarModel {
    fn default() -> Self {
        Self {
            mpe: false,
            single_channel: true,
            first_string_channel: 0,
            bend_range_semitones: 48,
            bend_range_cents: 0,
            strings: [GuitarString::default(); GUITAR_STRINGS],
        }
    }
}

impl GuitarModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> GuitarMode {
        if self.mpe {
            return GuitarMode::Mpe;
        }
        if self.single_channel {
            return GuitarMode::SingleChannel;
        }
        return GuitarMode::StringPerChannel;
    }

    pub fn strings(&self) -> &[GuitarString; GUITAR_STRINGS] {
        &self.strings
    }

    pub fn first_string_channel(&self) -> u8 {
        self.first_string_channel
    }

    pub fn bend_range(&self) -> (u16, u16) {
        (self.bend_range_semitones, self.bend_range_cents)
    }

    pub fn stop_strings(&mut self) {
        self.strings = [GuitarString::default(); GUITAR_STRINGS];
    }

    // Configuration //////////////////////////////////////////////////////

    /// Reflects a device parameter into the model. Returns false for
    /// parameters the model does not track.
    pub fn apply_parameter(&mut self, name: &ParamName, value: &PackedValue) -> bool {
        let tracked = [MPE_MODE, SINGLECH, MIDICHAN, PTCHBSEM, PTCHBCEN];
        if !tracked.contains(name) {
            return false;
        }
        let Ok(number) = value.as_i128() else {
            log::warn!("{} carries a non-numeric value {}", name, value);
            return true;
        };

        match *name {
            MPE_MODE => self.set_mpe_mode(number != 0),
            SINGLECH => self.set_single_channel(number != 0),
            MIDICHAN => self.set_channel(number),
            PTCHBSEM => match u16::try_from(number) {
                Ok(semitones) => self.set_bend_range(semitones, self.bend_range_cents),
                Err(_) => log::warn!("Bend range of {} semitones ignored", number),
            },
            PTCHBCEN => match u16::try_from(number) {
                Ok(cents) => self.set_bend_range(self.bend_range_semitones, cents),
                Err(_) => log::warn!("Bend range of {} cents ignored", number),
            },
            _ => {}
        }
        return true;
    }

    fn switch_mode<F: FnOnce(&mut Self)>(&mut self, change: F) {
        let before = self.mode();
        change(self);
        let after = self.mode();
        if before != after {
            log::info!("Mode changed from {} to {}", before, after);
            self.stop_strings();
        }
    }

    pub fn set_mpe_mode(&mut self, on: bool) {
        self.switch_mode(|model| model.mpe = on);
    }

    pub fn set_single_channel(&mut self, on: bool) {
        self.switch_mode(|model| model.single_channel = on);
    }

    /// Takes the 1-based channel the device reports.
    pub fn set_channel(&mut self, channel: i128) {
        if !(1..=16).contains(&channel) {
            log::warn!("First string channel {} out of range", channel);
            return;
        }
        self.first_string_channel = (channel - 1) as u8;
        log::info!("First string channel is {}", channel);
    }

    pub fn set_bend_range(&mut self, semitones: u16, cents: u16) {
        if (semitones, cents) == (self.bend_range_semitones, self.bend_range_cents) {
            return;
        }
        self.bend_range_semitones = semitones;
        self.bend_range_cents = cents;
        log::info!(
            "Bend range is now {} semitones and {} cents",
            semitones,
            cents
        );
    }

    // Performance ////////////////////////////////////////////////////////

    /// String played on `channel`. In single channel mode the string whose
    /// note equals `note` is picked, `None` meaning the first idle string;
    /// string 0 when nothing matches.
    fn find_string(&self, channel: u8, note: Option<u8>) -> Result<usize> {
        let index = match self.mode() {
            GuitarMode::SingleChannel => {
                return Ok(self
                    .strings
                    .iter()
                    .position(|string| string.note == note)
                    .unwrap_or(0));
            }
            GuitarMode::StringPerChannel => channel as i32 - self.first_string_channel as i32,
            GuitarMode::Mpe => channel as i32 - 1,
        };
        if index < 0 || index as usize >= GUITAR_STRINGS {
            return Err(AppError::new(
                ErrorType::ModelError,
                format!("channel {} is not a string in {} mode", channel, self.mode()),
            ));
        }
        return Ok(index as usize);
    }

    pub fn note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<()> {
        let index = self.find_string(channel, None)?;
        let string = &mut self.strings[index];
        string.note = Some(note);
        string.velocity = velocity;
        log::debug!("Note on ({}) {} vel {}", index + 1, note_name(note), velocity);
        return Ok(());
    }

    pub fn note_off(&mut self, channel: u8, note: u8, velocity: u8) -> Result<()> {
        let index = self.find_string(channel, Some(note))?;
        self.strings[index] = GuitarString {
            note: None,
            velocity,
            bend: 0,
            expression: 0,
        };
        log::debug!("Note off ({}) {} vel {}", index + 1, note_name(note), velocity);
        return Ok(());
    }

    /// Scales a raw bend (-8192..8191) by the bend range in cents.
    pub fn calc_bend(&self, bend: i32) -> i32 {
        let range = self.bend_range_semitones as i64 * 100 + self.bend_range_cents as i64;
        if range == 0 {
            return 0;
        }
        return (bend as i64 * MIDI_PITCH_BEND_CENTER as i64 / range) as i32;
    }

    pub fn bend(&mut self, channel: u8, bend: i32) -> Result<()> {
        let index = self.find_string(channel, None)?;
        self.strings[index].bend = self.calc_bend(bend);
        return Ok(());
    }

    pub fn expression_lsb(&mut self, channel: u8, value: u8) -> Result<()> {
        let index = self.find_string(channel, None)?;
        let string = &mut self.strings[index];
        string.expression = (string.expression & 0x3F80) | (value & 0x7F) as u16;
        return Ok(());
    }

    pub fn expression_msb(&mut self, channel: u8, value: u8) -> Result<()> {
        let index = self.find_string(channel, None)?;
        let string = &mut self.strings[index];
        string.expression = (string.expression & 0x007F) | (((value & 0x7F) as u16) << 7);
        return Ok(());
    }
}

impl fmt::Display for GuitarModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Mode: {}", self.mode())?;
        for (index, string) in self.strings.iter().enumerate() {
            let note = match string.note {
                Some(note) => note_name(note),
                None => "---".to_string(),
            };
            write!(
                f,
                "\n{} Nt: {}  Vl: {}  Bd: {}  Ex: {}",
                index + 1,
                note,
                string.velocity,
                string.bend,
                string.expression
            )?;
        }
        Ok(())
    }
}
