#[cfg(feature = "jack")]
pub mod jack;

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use regex::Regex;
use tokio::io::unix::AsyncFd;

use crate::{
    error::AppError,
    framer::{FrameResult, FrameSink, Fragmenter, SysexAssembler},
    jamstik::SYSEX_START,
    queue::{EventConsumer, EventProducer},
};

type Result<T> = std::result::Result<T, AppError>;

/// Peer output connected to our input
pub const READY_INBOUND: u8 = 1 << 0;
/// Our output connected to peer input
pub const READY_OUTBOUND: u8 = 1 << 1;
pub const READY_BOTH: u8 = READY_INBOUND | READY_OUTBOUND;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

// Link state /////////////////////////////////////////////////////////////

/// State shared by the audio callback, the host notification thread and
/// the control loop
#[derive(Debug, Default)]
pub struct LinkState {
    activated: AtomicBool,
    ready: AtomicU8,
    dropped: AtomicUsize,
}

impl LinkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_activated(&self) -> bool {
        self.activated.load(Ordering::Acquire)
    }

    pub fn set_activated(&self, activated: bool) {
        self.activated.store(activated, Ordering::Release);
    }

    pub fn ready_bits(&self) -> u8 {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.ready_bits() == READY_BOTH
    }

    pub fn update_ready(&self, bit: u8, connected: bool) -> u8 {
        let previous = if connected {
            self.ready.fetch_or(bit, Ordering::AcqRel)
        } else {
            self.ready.fetch_and(!bit, Ordering::AcqRel)
        };
        if connected {
            previous | bit
        } else {
            previous & !bit
        }
    }

    pub fn count_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of events dropped since the last call
    pub fn take_dropped(&self) -> usize {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

// Port pairing ///////////////////////////////////////////////////////////

/// Full port names on both ends of the link
#[derive(Debug, Clone, Default)]
pub struct PortNames {
    pub own_input: String,
    pub own_output: String,
    pub peer_input: Option<String>,
    pub peer_output: Option<String>,
}

/// Classifies connection notifications from the host
#[derive(Debug, Clone)]
pub struct PortPairing {
    names: PortNames,
}

impl PortPairing {
    pub fn new(names: PortNames) -> Self {
        Self { names }
    }

    /// Ready bit affected by a connection between `a` and `b`, in either
    /// order. Connections of our ports to anything but the peer are
    /// reported as mistakes when made.
    pub fn classify(&self, a: &str, b: &str, connected: bool) -> Option<u8> {
        let names = &self.names;

        if let Some(other) = other_end(a, b, &names.own_input) {
            if names.peer_output.as_deref() == Some(other) {
                return Some(READY_INBOUND);
            }
            if connected {
                log::warn!(
                    "Unexpected connection {} -> {}; connect {} to {}",
                    other,
                    names.own_input,
                    names.peer_output.as_deref().unwrap_or("the device output"),
                    names.own_input
                );
            }
            return None;
        }
        if let Some(other) = other_end(a, b, &names.own_output) {
            if names.peer_input.as_deref() == Some(other) {
                return Some(READY_OUTBOUND);
            }
            if connected {
                log::warn!(
                    "Unexpected connection {} -> {}; connect {} to {}",
                    names.own_output,
                    other,
                    names.own_output,
                    names.peer_input.as_deref().unwrap_or("the device input")
                );
            }
        }
        return None;
    }

    pub fn names(&self) -> &PortNames {
        &self.names
    }
}

fn other_end<'a>(a: &'a str, b: &'a str, own: &str) -> Option<&'a str> {
    if a == own {
        Some(b)
    } else if b == own {
        Some(a)
    } else {
        None
    }
}

// Transport //////////////////////////////////////////////////////////////

/// Host audio/MIDI server binding
pub trait Transport {
    fn port_names(&self) -> &PortNames;
    fn connect(&self, source: &str, destination: &str) -> Result<()>;
    fn link(&self) -> Arc<LinkState>;
    fn shutdown(&mut self) -> Result<()>;
}

/// Resolves a device port from the enumerated `ports` matching `pattern`.
/// The first one wins when several match.
pub fn pick_port(ports: Vec<String>, pattern: &Regex, direction: PortDirection) -> Option<String> {
    if ports.is_empty() {
        log::error!("No {:?} port matches {}", direction, pattern);
    } else if ports.len() > 1 {
        log::warn!(
            "{} ports match {}; using {}",
            ports.len(),
            pattern,
            ports[0]
        );
    }
    return ports.into_iter().next();
}

/// Connects both directions to the device. Returns whether both
/// connections were made; manual instructions are logged otherwise.
pub fn attach_peer<T: Transport>(transport: &T) -> bool {
    let names = transport.port_names();
    let mut attached = true;

    match &names.peer_output {
        Some(peer_output) => {
            if let Err(e) = transport.connect(peer_output, &names.own_input) {
                log::error!("Failed to connect input port: {}", e);
                attached = false;
            }
        }
        None => {
            log::error!("Device output port not found");
            attached = false;
        }
    }
    match &names.peer_input {
        Some(peer_input) => {
            if let Err(e) = transport.connect(&names.own_output, peer_input) {
                log::error!("Failed to connect output port: {}", e);
                attached = false;
            }
        }
        None => {
            log::error!("Device input port not found");
            attached = false;
        }
    }

    if !attached {
        log::warn!(
            "Connections must be made manually: {} -> {} and {} -> {}",
            names.peer_output.as_deref().unwrap_or("<device output>"),
            names.own_input,
            names.own_output,
            names.peer_input.as_deref().unwrap_or("<device input>")
        );
    }
    return attached;
}

// Doorbell ///////////////////////////////////////////////////////////////

/// Wakes the control loop from the audio thread through an eventfd
pub struct Doorbell {
    fd: AsyncFd<Arc<OwnedFd>>,
}

#[derive(Clone)]
pub struct DoorbellRinger {
    fd: Arc<OwnedFd>,
}

impl Doorbell {
    /// Must be called within a tokio runtime.
    pub fn new() -> Result<(Doorbell, DoorbellRinger)> {
        let raw = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error().into());
        }
        let fd = Arc::new(unsafe { OwnedFd::from_raw_fd(raw) });
        log::debug!("doorbell fd={}", raw);
        let ringer = DoorbellRinger { fd: fd.clone() };
        return Ok((Doorbell { fd: AsyncFd::new(fd)? }, ringer));
    }

    /// Waits for at least one ring. Returns how many rings were pending.
    pub async fn wait(&self) -> io::Result<u64> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| read_counter(inner.get_ref().as_raw_fd())) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}

fn read_counter(fd: libc::c_int) -> io::Result<u64> {
    let mut value: libc::eventfd_t = 0;
    let result = unsafe { libc::eventfd_read(fd, &mut value) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    return Ok(value);
}

impl DoorbellRinger {
    /// Safe to call from the audio thread.
    pub fn ring(&self) {
        unsafe {
            libc::eventfd_write(self.fd.as_raw_fd(), 1);
        }
    }
}

// Audio bridge ///////////////////////////////////////////////////////////

/// The work done inside the audio callback: inbound frames are reassembled
/// and queued, queued outbound events are written out. Nothing here
/// allocates, blocks or logs.
pub struct AudioBridge {
    assembler: SysexAssembler,
    fragmenter: Fragmenter,
    inbound: EventProducer,
    outbound: EventConsumer,
    ringer: DoorbellRinger,
    link: Arc<LinkState>,
}

impl AudioBridge {
    pub fn new(
        inbound: EventProducer,
        outbound: EventConsumer,
        ringer: DoorbellRinger,
        link: Arc<LinkState>,
    ) -> Self {
        Self {
            assembler: SysexAssembler::new(),
            fragmenter: Fragmenter::new(),
            inbound,
            outbound,
            ringer,
            link,
        }
    }

    pub fn ringer(&self) -> DoorbellRinger {
        self.ringer.clone()
    }

    /// Runs one callback. Complete channel events are copied to `thru`
    /// when given. Returns the number of events queued for the control
    /// loop.
    pub fn process<'a, I, O, T>(&mut self, frames: I, sink: &mut O, mut thru: Option<&mut T>) -> usize
    where
        I: IntoIterator<Item = &'a [u8]>,
        O: FrameSink,
        T: FrameSink,
    {
        if !self.link.is_activated() {
            return 0;
        }

        let mut queued = 0;
        for frame in frames {
            match self.assembler.feed(frame) {
                FrameResult::Complete => {
                    let event = self.assembler.event();
                    if event[0] != SYSEX_START {
                        if let Some(thru) = thru.as_deref_mut() {
                            if thru.space() >= event.len() {
                                thru.write(event);
                            }
                        }
                    }
                    match self.inbound.push(event) {
                        Ok(()) => queued += 1,
                        Err(_) => self.link.count_drop(),
                    }
                }
                FrameResult::Continuing => {}
                FrameResult::Dropped | FrameResult::FatalError => self.link.count_drop(),
            }
        }

        self.fragmenter.drain(&mut self.outbound, sink);

        if queued > 0 {
            self.ringer.ring();
        }
        return queued;
    }
}

/// Control side of the link
pub struct ControlEndpoints {
    pub inbound: EventConsumer,
    pub outbound: EventProducer,
    pub doorbell: Doorbell,
    pub link: Arc<LinkState>,
}

/// Builds both queues and the doorbell, split into the audio half and the
/// control half.
pub fn endpoints(link: Arc<LinkState>) -> Result<(AudioBridge, ControlEndpoints)> {
    let (inbound_tx, inbound_rx) = crate::queue::channel();
    let (outbound_tx, outbound_rx) = crate::queue::channel();
    let (doorbell, ringer) = Doorbell::new()?;
    let bridge = AudioBridge::new(inbound_tx, outbound_rx, ringer, link.clone());
    let control = ControlEndpoints {
        inbound: inbound_rx,
        outbound: outbound_tx,
        doorbell,
        link,
    };
    return Ok((bridge, control));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::time::Duration;

    struct VecSink {
        capacity: usize,
        bytes: Vec<Vec<u8>>,
    }

    impl FrameSink for VecSink {
        fn space(&self) -> usize {
            self.capacity - self.bytes.iter().map(|b| b.len()).sum::<usize>()
        }

        fn write(&mut self, bytes: &[u8]) -> bool {
            self.bytes.push(bytes.to_vec());
            true
        }
    }

    fn sink(capacity: usize) -> VecSink {
        VecSink {
            capacity,
            bytes: Vec::new(),
        }
    }

    fn names() -> PortNames {
        PortNames {
            own_input: "jamstikctl:Guitar In".to_string(),
            own_output: "jamstikctl:Guitar Out".to_string(),
            peer_input: Some("a2j:Jamstik MIDI IN".to_string()),
            peer_output: Some("a2j:Jamstik [24] (capture): Jamstik MIDI IN".to_string()),
        }
    }

    #[test]
    fn test_ready_bits() {
        let link = LinkState::new();
        assert!(!link.is_ready());
        assert_eq!(link.update_ready(READY_INBOUND, true), READY_INBOUND);
        assert!(!link.is_ready());
        assert_eq!(link.update_ready(READY_OUTBOUND, true), READY_BOTH);
        assert!(link.is_ready());
        assert_eq!(link.update_ready(READY_INBOUND, false), READY_OUTBOUND);
        assert!(!link.is_ready());
    }

    #[test]
    fn test_drop_counter() {
        let link = LinkState::new();
        link.count_drop();
        link.count_drop();
        assert_eq!(link.take_dropped(), 2);
        assert_eq!(link.take_dropped(), 0);
    }

    #[test]
    fn test_port_pairing() {
        let names = names();
        let peer_output = names.peer_output.clone().unwrap();
        let peer_input = names.peer_input.clone().unwrap();
        let pairing = PortPairing::new(names);
        assert_eq!(
            pairing.classify(&peer_output, "jamstikctl:Guitar In", true),
            Some(READY_INBOUND)
        );
        assert_eq!(
            pairing.classify("jamstikctl:Guitar In", &peer_output, false),
            Some(READY_INBOUND)
        );
        assert_eq!(
            pairing.classify("jamstikctl:Guitar Out", &peer_input, true),
            Some(READY_OUTBOUND)
        );
        assert_eq!(
            pairing.classify("system:midi_capture_1", "jamstikctl:Guitar In", true),
            None
        );
        assert_eq!(pairing.classify("a:b", "c:d", true), None);
    }

    struct FakeTransport {
        names: PortNames,
        refuse: bool,
        connections: RefCell<Vec<(String, String)>>,
        link: Arc<LinkState>,
    }

    impl Transport for FakeTransport {
        fn port_names(&self) -> &PortNames {
            &self.names
        }

        fn connect(&self, source: &str, destination: &str) -> Result<()> {
            if self.refuse {
                return Err(AppError::transport("refused"));
            }
            self.connections
                .borrow_mut()
                .push((source.to_string(), destination.to_string()));
            Ok(())
        }

        fn link(&self) -> Arc<LinkState> {
            self.link.clone()
        }

        fn shutdown(&mut self) -> Result<()> {
            self.link.set_activated(false);
            Ok(())
        }
    }

    #[test]
    fn test_attach_peer() {
        let transport = FakeTransport {
            names: names(),
            refuse: false,
            connections: RefCell::new(Vec::new()),
            link: Arc::new(LinkState::new()),
        };
        assert!(attach_peer(&transport));
        let connections = transport.connections.borrow();
        assert_eq!(connections.len(), 2);
        assert_eq!(connections[0].1, "jamstikctl:Guitar In");
        assert_eq!(connections[1].0, "jamstikctl:Guitar Out");
    }

    #[test]
    fn test_pick_port() {
        let pattern = Regex::new(".*Jamstik MIDI IN$").unwrap();
        assert_eq!(pick_port(Vec::new(), &pattern, PortDirection::Input), None);
        let ports = vec![
            "a2j:Jamstik [24] (playback): Jamstik MIDI IN".to_string(),
            "a2j:Jamstik [28] (playback): Jamstik MIDI IN".to_string(),
        ];
        assert_eq!(
            pick_port(ports, &pattern, PortDirection::Input).as_deref(),
            Some("a2j:Jamstik [24] (playback): Jamstik MIDI IN")
        );
    }

    #[test]
    fn test_attach_peer_failure() {
        let mut names = names();
        names.peer_input = None;
        let transport = FakeTransport {
            names,
            refuse: true,
            connections: RefCell::new(Vec::new()),
            link: Arc::new(LinkState::new()),
        };
        assert!(!attach_peer(&transport));
    }

    #[tokio::test]
    async fn test_bridge_round_trip() {
        let link = Arc::new(LinkState::new());
        let Ok((mut bridge, mut control)) = endpoints(link.clone()) else {
            panic!("endpoints must be created");
        };

        let mut out = sink(64);
        let mut thru = sink(64);
        let frames: [&[u8]; 1] = [&[0x90, 0x40, 0x7F]];
        assert_eq!(bridge.process(frames, &mut out, Some(&mut thru)), 0);
        assert!(control.inbound.is_empty());

        link.set_activated(true);
        let frames: [&[u8]; 4] = [
            &[0x90, 0x40, 0x7F],
            &[0xF0, 0x00, 0x02, 0x02, 0x67],
            &[0xF7],
            &[0x40],
        ];
        assert_eq!(bridge.process(frames, &mut out, Some(&mut thru)), 2);
        assert_eq!(thru.bytes, vec![vec![0x90, 0x40, 0x7F]]);
        assert_eq!(link.take_dropped(), 1);

        let rings = tokio::time::timeout(Duration::from_secs(1), control.doorbell.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rings, 1);
        assert_eq!(control.inbound.pop(), Some(vec![0x90, 0x40, 0x7F]));
        assert_eq!(
            control.inbound.pop(),
            Some(vec![0xF0, 0x00, 0x02, 0x02, 0x67, 0xF7])
        );

        control.outbound.push(&[0xB0, 0x07, 0x64]).unwrap();
        let no_frames: [&[u8]; 0] = [];
        bridge.process(no_frames, &mut out, None::<&mut VecSink>);
        assert_eq!(out.bytes, vec![vec![0xB0, 0x07, 0x64]]);
    }

    #[tokio::test]
    async fn test_bridge_splits_large_event() {
        let link = Arc::new(LinkState::new());
        let Ok((mut bridge, mut control)) = endpoints(link.clone()) else {
            panic!("endpoints must be created");
        };
        link.set_activated(true);

        let mut event = vec![0xF0];
        event.extend((1..=38).map(|b| b as u8));
        event.push(0xF7);
        control.outbound.push(&event).unwrap();
        while !control.outbound.is_full() {
            control.outbound.push(&[0xB0, 0x07, 0x64]).unwrap();
        }

        // the event keeps its slot until the last piece is written
        for range in [0..16, 16..32] {
            let mut out = sink(16);
            let no_frames: [&[u8]; 0] = [];
            bridge.process(no_frames, &mut out, None::<&mut VecSink>);
            assert_eq!(out.bytes, vec![event[range].to_vec()]);
            assert!(control.outbound.is_full());
        }

        let mut out = sink(8);
        let no_frames: [&[u8]; 0] = [];
        bridge.process(no_frames, &mut out, None::<&mut VecSink>);
        assert_eq!(out.bytes, vec![event[32..].to_vec()]);
        assert!(!control.outbound.is_full());

        let mut out = sink(3);
        let no_frames: [&[u8]; 0] = [];
        bridge.process(no_frames, &mut out, None::<&mut VecSink>);
        assert_eq!(out.bytes, vec![vec![0xB0, 0x07, 0x64]]);
    }
}
