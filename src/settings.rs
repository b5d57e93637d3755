use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use crate::{
    command::{Setting, StringSetting, Toggle},
    error::AppError,
    jamstik::{GUITAR_STRINGS, ParamName},
};

type Result<T> = std::result::Result<T, AppError>;

pub const CONFIG_ENV: &str = "JAMSTIKCTL_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "jamstikctl.yaml";

/// Parameter names behind the interactive commands
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParameterNames {
    pub expression: String,
    pub pitch_bend: String,
    pub mpe_mode: String,
    pub transpose: String,
    pub single_channel: String,
    pub midi_channel: String,
    pub bend_semitones: String,
    pub bend_cents: String,
    pub transcription: String,
    pub velocity_min: String,
    pub velocity_max: String,
    pub open_notes: Vec<String>,
    pub triggers: Vec<String>,
}

impl Default for ParameterNames {
    fn default() -> Self {
        DEFAULT_SETTINGS.parameters.clone()
    }
}

impl ParameterNames {
    pub fn toggle(&self, toggle: Toggle) -> Option<ParamName> {
        let name = match toggle {
            Toggle::Expression => &self.expression,
            Toggle::PitchBend => &self.pitch_bend,
            Toggle::Mpe => &self.mpe_mode,
            Toggle::SingleChannel => &self.single_channel,
            Toggle::Transcription => &self.transcription,
        };
        ParamName::padded(name)
    }

    pub fn setting(&self, setting: Setting) -> Option<ParamName> {
        let name = match setting {
            Setting::Transpose => &self.transpose,
            Setting::MidiChannel => &self.midi_channel,
            Setting::BendSemitones => &self.bend_semitones,
            Setting::BendCents => &self.bend_cents,
            Setting::VelocityMin => &self.velocity_min,
            Setting::VelocityMax => &self.velocity_max,
        };
        ParamName::padded(name)
    }

    pub fn string_setting(&self, setting: StringSetting, string: usize) -> Option<ParamName> {
        let names = match setting {
            StringSetting::OpenNote => &self.open_notes,
            StringSetting::Trigger => &self.triggers,
        };
        ParamName::padded(names.get(string)?)
    }

    fn validate(&self) -> Result<()> {
        let single = [
            &self.expression,
            &self.pitch_bend,
            &self.mpe_mode,
            &self.transpose,
            &self.single_channel,
            &self.midi_channel,
            &self.bend_semitones,
            &self.bend_cents,
            &self.transcription,
            &self.velocity_min,
            &self.velocity_max,
        ];
        for name in single
            .into_iter()
            .chain(self.open_notes.iter())
            .chain(self.triggers.iter())
        {
            if ParamName::padded(name).is_none() {
                return Err(AppError::config(&format!(
                    "parameter name {:?} must be at most 8 ASCII characters",
                    name
                )));
            }
        }
        if self.open_notes.len() != GUITAR_STRINGS || self.triggers.len() != GUITAR_STRINGS {
            return Err(AppError::config(&format!(
                "open_notes and triggers need {} names each",
                GUITAR_STRINGS
            )));
        }
        return Ok(());
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub client_name: String,
    pub input_port: String,
    pub output_port: String,
    pub thru_port: String,
    /// Regex matching the device's MIDI ports
    pub peer_port_pattern: String,
    pub parameters: ParameterNames,
}

impl Default for Settings {
    fn default() -> Self {
        DEFAULT_SETTINGS.clone()
    }
}

fn per_string(prefix: &str) -> Vec<String> {
    (1..=GUITAR_STRINGS)
        .map(|string| format!("{}{}", prefix, string))
        .collect()
}

lazy_static! {
    pub static ref DEFAULT_SETTINGS: Settings = Settings {
        client_name: "jamstikctl".to_string(),
        input_port: "Guitar In".to_string(),
        output_port: "Guitar Out".to_string(),
        thru_port: "Guitar Thru".to_string(),
        peer_port_pattern: ".*Jamstik MIDI IN$".to_string(),
        parameters: ParameterNames {
            expression: "EXPRSSON".to_string(),
            pitch_bend: "PTCHBEND".to_string(),
            mpe_mode: "MPE_MODE".to_string(),
            transpose: "TRANSPSE".to_string(),
            single_channel: "SINGLECH".to_string(),
            midi_channel: "MIDICHAN".to_string(),
            bend_semitones: "PTCHBSEM".to_string(),
            bend_cents: "PTCHBCEN".to_string(),
            transcription: "TRANSCRB".to_string(),
            velocity_min: "VELMIN".to_string(),
            velocity_max: "VELMAX".to_string(),
            open_notes: per_string("OPENNT_"),
            triggers: per_string("TRIGGR_"),
        },
    };
}

impl Settings {
    /// Settings from the file named by JAMSTIKCTL_CONFIG, else from
    /// jamstikctl.yaml when present, else the defaults.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(&path);
        }
        if Path::new(DEFAULT_CONFIG_FILE).is_file() {
            return Self::from_file(DEFAULT_CONFIG_FILE);
        }
        log::debug!("No settings file, using defaults");
        return Ok(Self::default());
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            AppError::config(&format!("cannot read {:?}: {}", path.as_ref(), e))
        })?;
        let settings = Self::from_yaml(&content)?;
        log::info!("Settings loaded from {:?}", path.as_ref());
        return Ok(settings);
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(content)?;
        settings.peer_pattern()?;
        settings.parameters.validate()?;
        return Ok(settings);
    }

    pub fn peer_pattern(&self) -> Result<Regex> {
        return Ok(Regex::new(&self.peer_port_pattern)?);
    }
}
