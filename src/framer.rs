use crate::{
    jamstik::{MIDI_MAX_BUFFER_SIZE, SYSEX_END, SYSEX_START},
    queue::EventConsumer,
};

/// Outcome of handing one frame to the framer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameResult {
    /// A whole event is available
    Complete,
    /// More frames are needed before the event is whole
    Continuing,
    /// The frame was not a valid event and was thrown away
    Dropped,
    /// The event grew beyond MIDI_MAX_BUFFER_SIZE and was thrown away
    FatalError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssemblerState {
    Idle,
    Accumulating,
}

// Inbound ////////////////////////////////////////////////////////////////

/// Reassembles SysEx messages the host delivers in pieces. The buffer is
/// allocated once up front; feeding frames never allocates.
pub struct SysexAssembler {
    buffer: Box<[u8]>,
    size: usize,
    state: AssemblerState,
}

impl SysexAssembler {
    pub fn new() -> Self {
        Self {
            buffer: vec![0u8; MIDI_MAX_BUFFER_SIZE].into_boxed_slice(),
            size: 0,
            state: AssemblerState::Idle,
        }
    }

    pub fn feed(&mut self, frame: &[u8]) -> FrameResult {
        let Some(last) = frame.last() else {
            return FrameResult::Dropped;
        };

        match self.state {
            AssemblerState::Idle => {
                if frame[0] & 0x80 == 0 {
                    return FrameResult::Dropped;
                }
                if frame.len() > MIDI_MAX_BUFFER_SIZE {
                    return FrameResult::FatalError;
                }
                self.buffer[..frame.len()].copy_from_slice(frame);
                self.size = frame.len();
                if frame[0] == SYSEX_START && *last != SYSEX_END {
                    self.state = AssemblerState::Accumulating;
                    return FrameResult::Continuing;
                }
                return FrameResult::Complete;
            }
            AssemblerState::Accumulating => {
                let end = self.size + frame.len();
                if end > MIDI_MAX_BUFFER_SIZE {
                    self.reset();
                    return FrameResult::FatalError;
                }
                self.buffer[self.size..end].copy_from_slice(frame);
                self.size = end;
                if *last == SYSEX_END {
                    self.state = AssemblerState::Idle;
                    return FrameResult::Complete;
                }
                return FrameResult::Continuing;
            }
        }
    }

    /// The last completed event. Only meaningful right after `feed`
    /// returned `Complete`.
    pub fn event(&self) -> &[u8] {
        &self.buffer[..self.size]
    }

    pub fn is_accumulating(&self) -> bool {
        self.state == AssemblerState::Accumulating
    }

    pub fn reset(&mut self) {
        self.size = 0;
        self.state = AssemblerState::Idle;
    }
}

// Outbound ///////////////////////////////////////////////////////////////

/// Where outbound bytes go during one audio callback
pub trait FrameSink {
    /// Bytes that can still be written in this callback
    fn space(&self) -> usize;
    fn write(&mut self, bytes: &[u8]) -> bool;
}

/// Splits events that do not fit into the host buffer over several
/// callbacks. An event is consumed only once its last byte is written.
#[derive(Debug, Default)]
pub struct Fragmenter {
    offset: usize,
}

impl Fragmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes as much of `event` as the sink takes.
    pub fn write_event<S: FrameSink>(&mut self, event: &[u8], sink: &mut S) -> FrameResult {
        if event.is_empty() {
            self.offset = 0;
            return FrameResult::Dropped;
        }
        let remaining = &event[self.offset.min(event.len())..];
        let space = sink.space();
        if space == 0 {
            return FrameResult::Continuing;
        }
        if remaining.len() > space {
            if sink.write(&remaining[..space]) {
                self.offset += space;
            }
            return FrameResult::Continuing;
        }
        if !sink.write(remaining) {
            return FrameResult::Continuing;
        }
        self.offset = 0;
        return FrameResult::Complete;
    }

    /// Drains queued events into the sink until it is full. Returns the
    /// number of events fully written.
    pub fn drain<S: FrameSink>(&mut self, queue: &mut EventConsumer, sink: &mut S) -> usize {
        let mut completed = 0;
        loop {
            let result = match queue.peek() {
                Some(event) => self.write_event(event, sink),
                None => break,
            };
            match result {
                FrameResult::Complete => {
                    queue.discard();
                    completed += 1;
                }
                FrameResult::Dropped => queue.discard(),
                FrameResult::Continuing | FrameResult::FatalError => break,
            }
        }
        return completed;
    }

    pub fn in_progress(&self) -> bool {
        self.offset > 0
    }
}
