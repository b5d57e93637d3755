use std::collections::BTreeMap;

use crate::jamstik::{
    CC_DATA_ENTRY_LSB, CC_DATA_ENTRY_MSB, CC_RPN_LSB, CC_RPN_MSB, MIDI_CHANNELS,
    MIDI_PITCH_BEND_CENTER,
};

/// Deselected state (RPN 127/127)
pub const RPN_NULL: u16 = 0x3FFF;

pub const RPN_PITCH_BEND_SENSITIVITY: u16 = 0;
pub const RPN_FINE_TUNING: u16 = 1;
pub const RPN_COARSE_TUNING: u16 = 2;
pub const RPN_MPE_CONFIGURATION: u16 = 6;

/// Meaning of a registered parameter after a data entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpnChange {
    PitchBendSensitivity { channel: u8, semitones: u8, cents: u8 },
    FineTuning { channel: u8, cents: i32 },
    CoarseTuning { channel: u8, semitones: i32 },
    MpeConfiguration { channel: u8, member_channels: u8 },
    Other { channel: u8, rpn: u16, value: u16 },
}

#[derive(Debug, Clone)]
struct ChannelState {
    selected: u16,
    values: BTreeMap<u16, u16>,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            selected: RPN_NULL,
            values: BTreeMap::new(),
        }
    }
}

/// Follows the RPN select / data entry controllers of every channel
#[derive(Debug, Clone)]
pub struct RpnTracker {
    channels: Vec<ChannelState>,
}

impl Default for RpnTracker {
    fn default() -> Self {
        Self {
            channels: vec![ChannelState::default(); MIDI_CHANNELS],
        }
    }
}

impl RpnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self, channel: u8) -> u16 {
        self.channels[(channel & 0x0F) as usize].selected
    }

    pub fn value(&self, channel: u8, rpn: u16) -> Option<u16> {
        self.channels[(channel & 0x0F) as usize]
            .values
            .get(&rpn)
            .copied()
    }

    /// Feeds a control change. Returns the updated parameter when the
    /// controller was a data entry for a selected RPN.
    pub fn control_change(&mut self, channel: u8, controller: u8, value: u8) -> Option<RpnChange> {
        let channel = channel & 0x0F;
        let value = (value & 0x7F) as u16;
        let state = &mut self.channels[channel as usize];
        match controller {
            CC_RPN_MSB => {
                state.selected = (value << 7) | (state.selected & 0x7F);
                return None;
            }
            CC_RPN_LSB => {
                state.selected = (state.selected & 0x3F80) | value;
                return None;
            }
            CC_DATA_ENTRY_MSB | CC_DATA_ENTRY_LSB => {}
            _ => return None,
        }

        if state.selected == RPN_NULL {
            log::debug!("Data entry on channel {} with no RPN selected", channel);
            return None;
        }
        let rpn = state.selected;
        let entry = state.values.entry(rpn).or_insert(0);
        if controller == CC_DATA_ENTRY_MSB {
            *entry = (value << 7) | (*entry & 0x7F);
        } else {
            *entry = (*entry & 0x3F80) | value;
        }
        return Some(interpret(channel, rpn, *entry));
    }
}

fn interpret(channel: u8, rpn: u16, value: u16) -> RpnChange {
    let msb = (value >> 7) as u8;
    let lsb = (value & 0x7F) as u8;
    match rpn {
        RPN_PITCH_BEND_SENSITIVITY => RpnChange::PitchBendSensitivity {
            channel,
            semitones: msb,
            cents: lsb,
        },
        RPN_FINE_TUNING => RpnChange::FineTuning {
            channel,
            cents: (value as i32 - MIDI_PITCH_BEND_CENTER) * 100 / MIDI_PITCH_BEND_CENTER,
        },
        RPN_COARSE_TUNING => RpnChange::CoarseTuning {
            channel,
            semitones: msb as i32 - 64,
        },
        RPN_MPE_CONFIGURATION => {
            if channel != 0 {
                log::debug!("MPE configuration on channel {} ignored by zones", channel);
            }
            RpnChange::MpeConfiguration {
                channel,
                member_channels: msb,
            }
        }
        _ => RpnChange::Other {
            channel,
            rpn,
            value,
        },
    }
}
