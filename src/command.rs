/// Boolean parameters flipped by a single key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Expression,
    PitchBend,
    Mpe,
    SingleChannel,
    Transcription,
}

/// Numeric parameters set from the number entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    Transpose,
    MidiChannel,
    BendSemitones,
    BendCents,
    VelocityMin,
    VelocityMax,
}

/// Numeric parameters that exist once per string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringSetting {
    OpenNote,
    Trigger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Digit(u8),
    Minus,
    ClearEntry,
    Toggle(Toggle),
    Set(Setting),
    SetString(StringSetting),
    /// Zero based string index
    SelectString(usize),
    Quit,
}

impl Command {
    pub fn from_key(key: u8) -> Option<Command> {
        let command = match key {
            b'0'..=b'9' => Command::Digit(key - b'0'),
            b'-' => Command::Minus,
            b'C' => Command::ClearEntry,
            b'w' => Command::Toggle(Toggle::Expression),
            b'e' => Command::Toggle(Toggle::PitchBend),
            b'r' => Command::Toggle(Toggle::Mpe),
            b't' => Command::Set(Setting::Transpose),
            b'y' => Command::Toggle(Toggle::SingleChannel),
            b'u' => Command::Set(Setting::MidiChannel),
            b'i' => Command::Set(Setting::BendSemitones),
            b'o' => Command::Set(Setting::BendCents),
            b'p' => Command::Toggle(Toggle::Transcription),
            b'a' => Command::Set(Setting::VelocityMin),
            b's' => Command::Set(Setting::VelocityMax),
            b'd' => Command::SetString(StringSetting::OpenNote),
            b'f' => Command::SetString(StringSetting::Trigger),
            b'z' => Command::SelectString(0),
            b'x' => Command::SelectString(1),
            b'c' => Command::SelectString(2),
            b'v' => Command::SelectString(3),
            b'b' => Command::SelectString(4),
            b'n' => Command::SelectString(5),
            b'q' => Command::Quit,
            _ => return None,
        };
        return Some(command);
    }
}

/// Decimal number typed in before a set command
#[derive(Debug, Clone, Default)]
pub struct NumberEntry {
    digits: String,
    negative: bool,
}

impl NumberEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_digit(&mut self, digit: u8) {
        // 18 digits always fit into an i64
        if self.digits.len() < 18 {
            self.digits.push((b'0' + digit) as char);
        }
    }

    /// Flips the sign
    pub fn minus(&mut self) {
        self.negative = !self.negative;
    }

    pub fn clear(&mut self) {
        self.digits.clear();
        self.negative = false;
    }

    pub fn value(&self) -> Option<i64> {
        let magnitude: i64 = self.digits.parse().ok()?;
        if self.negative {
            return Some(-magnitude);
        }
        return Some(magnitude);
    }
}

impl std::fmt::Display for NumberEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.negative {
            write!(f, "-")?;
        }
        write!(f, "{}", self.digits)
    }
}
