use std::{fmt, mem::MaybeUninit, ptr};

use rtrb::{Consumer, Producer, RingBuffer};

use crate::jamstik::{MIDI_MAX_BUFFER_SIZE, MIDI_MAX_EVENTS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    Full,
    TooLarge(usize),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueueError::Full => write!(f, "event queue is full"),
            QueueError::TooLarge(size) => write!(
                f,
                "event of {} bytes exceeds {} bytes",
                size, MIDI_MAX_BUFFER_SIZE
            ),
        }
    }
}

impl std::error::Error for QueueError {}

/// Fixed size slot so that nothing is allocated while crossing the audio
/// thread boundary. Only the first `size` bytes are ever written.
pub struct MidiEvent {
    size: usize,
    buffer: [MaybeUninit<u8>; MIDI_MAX_BUFFER_SIZE],
}

impl MidiEvent {
    pub fn bytes(&self) -> &[u8] {
        // the first `size` bytes were initialized by EventProducer::push
        unsafe { std::slice::from_raw_parts(self.buffer.as_ptr() as *const u8, self.size) }
    }
}

/// Creates a queue pair holding up to MIDI_MAX_EVENTS events.
pub fn channel() -> (EventProducer, EventConsumer) {
    let (producer, consumer) = RingBuffer::new(MIDI_MAX_EVENTS);
    return (EventProducer { producer }, EventConsumer { consumer });
}

pub struct EventProducer {
    producer: Producer<MidiEvent>,
}

impl EventProducer {
    /// Copies `bytes` into the next free slot in place. Never blocks.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), QueueError> {
        if bytes.len() > MIDI_MAX_BUFFER_SIZE {
            return Err(QueueError::TooLarge(bytes.len()));
        }
        let Ok(mut chunk) = self.producer.write_chunk_uninit(1) else {
            return Err(QueueError::Full);
        };
        let (slots, _) = chunk.as_mut_slices();
        let event = slots[0].as_mut_ptr();
        // size and the leading bytes are written before the slot is committed
        unsafe {
            ptr::addr_of_mut!((*event).size).write(bytes.len());
            let buffer = ptr::addr_of_mut!((*event).buffer) as *mut u8;
            ptr::copy_nonoverlapping(bytes.as_ptr(), buffer, bytes.len());
            chunk.commit(1);
        }
        return Ok(());
    }

    pub fn is_full(&self) -> bool {
        self.producer.is_full()
    }
}

pub struct EventConsumer {
    consumer: Consumer<MidiEvent>,
}

impl EventConsumer {
    /// Oldest event, left in the queue
    pub fn peek(&self) -> Option<&[u8]> {
        match self.consumer.peek() {
            Ok(event) => Some(event.bytes()),
            Err(_) => None,
        }
    }

    /// Drops the oldest event in place.
    pub fn discard(&mut self) {
        if let Ok(chunk) = self.consumer.read_chunk(1) {
            chunk.commit_all();
        }
    }

    /// Copies the oldest event out. Allocates, so not for the audio thread.
    pub fn pop(&mut self) -> Option<Vec<u8>> {
        let event = self.peek()?.to_vec();
        self.discard();
        return Some(event);
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }
}
