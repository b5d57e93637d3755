use std::sync::Arc;

use ::jack::{
    AsyncClient, Client, ClientOptions, ClientStatus, Control, MidiIn, MidiOut, MidiWriter,
    NotificationHandler, Port, PortFlags, PortId, ProcessHandler, ProcessScope, RawMidi,
};
use regex::Regex;

use super::{
    AudioBridge, ControlEndpoints, DoorbellRinger, LinkState, PortDirection, PortNames,
    PortPairing, READY_BOTH, Transport, pick_port,
};
use crate::{error::AppError, framer::FrameSink, settings::Settings};

type Result<T> = std::result::Result<T, AppError>;

const MIDI_PORT_TYPE: &str = "8 bit raw midi";

struct WriterSink<'a> {
    writer: MidiWriter<'a>,
}

impl FrameSink for WriterSink<'_> {
    fn space(&self) -> usize {
        self.writer.max_event_size()
    }

    fn write(&mut self, bytes: &[u8]) -> bool {
        self.writer.write(&RawMidi { time: 0, bytes }).is_ok()
    }
}

/// Runs in the JACK realtime thread
struct Processor {
    input: Port<MidiIn>,
    output: Port<MidiOut>,
    thru: Port<MidiOut>,
    bridge: AudioBridge,
}

impl ProcessHandler for Processor {
    fn process(&mut self, _client: &Client, ps: &ProcessScope) -> Control {
        let mut sink = WriterSink {
            writer: self.output.writer(ps),
        };
        let mut thru = WriterSink {
            writer: self.thru.writer(ps),
        };
        let frames = self.input.iter(ps).map(|event| event.bytes);
        self.bridge.process(frames, &mut sink, Some(&mut thru));
        Control::Continue
    }
}

struct Notifications {
    pairing: PortPairing,
    link: Arc<LinkState>,
    ringer: DoorbellRinger,
}

impl NotificationHandler for Notifications {
    unsafe fn shutdown(&mut self, status: ClientStatus, reason: &str) {
        log::warn!("JACK server shut down: {:?} - {}", status, reason);
        self.link.set_activated(false);
        self.ringer.ring();
    }

    fn ports_connected(
        &mut self,
        client: &Client,
        port_id_a: PortId,
        port_id_b: PortId,
        are_connected: bool,
    ) {
        let (Some(port_a), Some(port_b)) = (client.port_by_id(port_id_a), client.port_by_id(port_id_b))
        else {
            return;
        };
        let (Ok(name_a), Ok(name_b)) = (port_a.name(), port_b.name()) else {
            return;
        };
        let Some(bit) = self.pairing.classify(&name_a, &name_b, are_connected) else {
            return;
        };
        let bits = self.link.update_ready(bit, are_connected);
        if bits == READY_BOTH {
            log::info!("Device connected in both directions");
        } else if bits == 0 {
            log::info!("Device disconnected");
        } else {
            log::info!("1 connection remaining");
        }
        self.ringer.ring();
    }
}

/// Names of the MIDI ports matching `pattern` that flow in `direction`
fn list_ports(client: &Client, pattern: &Regex, direction: PortDirection) -> Vec<String> {
    let flags = match direction {
        PortDirection::Input => PortFlags::IS_INPUT,
        PortDirection::Output => PortFlags::IS_OUTPUT,
    };
    client
        .ports(None, Some(MIDI_PORT_TYPE), flags)
        .into_iter()
        .filter(|name| pattern.is_match(name))
        .collect()
}

/// JACK client with the Guitar In/Out/Thru ports
pub struct JackTransport {
    client: Option<AsyncClient<Notifications, Processor>>,
    names: PortNames,
    link: Arc<LinkState>,
}

impl JackTransport {
    /// Opens the client, registers the ports, resolves the device ports and
    /// activates processing. Connecting to the device is left to
    /// `attach_peer`.
    pub fn open(settings: &Settings) -> Result<(Self, ControlEndpoints)> {
        let (client, status) = Client::new(&settings.client_name, ClientOptions::NO_START_SERVER)
            .map_err(|e| AppError::transport(&format!("Failed to open JACK client: {}", e)))?;
        log::debug!("JACK client opened; status={:?}", status);

        let input = client
            .register_port(&settings.input_port, MidiIn::default())
            .map_err(|e| AppError::transport(&format!("Failed to register input port: {}", e)))?;
        let output = client
            .register_port(&settings.output_port, MidiOut::default())
            .map_err(|e| AppError::transport(&format!("Failed to register output port: {}", e)))?;
        let thru = client
            .register_port(&settings.thru_port, MidiOut::default())
            .map_err(|e| AppError::transport(&format!("Failed to register thru port: {}", e)))?;

        let own_input = input
            .name()
            .map_err(|e| AppError::transport(&e.to_string()))?;
        let own_output = output
            .name()
            .map_err(|e| AppError::transport(&e.to_string()))?;

        let pattern = settings.peer_pattern()?;
        let names = PortNames {
            own_input,
            own_output,
            peer_input: pick_port(
                list_ports(&client, &pattern, PortDirection::Input),
                &pattern,
                PortDirection::Input,
            ),
            peer_output: pick_port(
                list_ports(&client, &pattern, PortDirection::Output),
                &pattern,
                PortDirection::Output,
            ),
        };
        log::info!(
            "Ports registered; in={}, out={}, device in={:?}, device out={:?}",
            names.own_input,
            names.own_output,
            names.peer_input,
            names.peer_output
        );

        let link = Arc::new(LinkState::new());
        let (bridge, control) = super::endpoints(link.clone())?;
        let notifications = Notifications {
            pairing: PortPairing::new(names.clone()),
            link: link.clone(),
            ringer: bridge.ringer(),
        };
        let processor = Processor {
            input,
            output,
            thru,
            bridge,
        };

        link.set_activated(true);
        let client = match client.activate_async(notifications, processor) {
            Ok(client) => client,
            Err(e) => {
                link.set_activated(false);
                return Err(AppError::transport(&format!(
                    "Failed to activate JACK client: {}",
                    e
                )));
            }
        };
        log::info!("JACK client activated");

        return Ok((
            Self {
                client: Some(client),
                names,
                link,
            },
            control,
        ));
    }
}

impl Transport for JackTransport {
    fn port_names(&self) -> &PortNames {
        &self.names
    }

    fn connect(&self, source: &str, destination: &str) -> Result<()> {
        let Some(client) = &self.client else {
            return Err(AppError::transport("JACK client is closed"));
        };
        client
            .as_client()
            .connect_ports_by_name(source, destination)
            .map_err(|e| {
                AppError::transport(&format!(
                    "Failed to connect {} to {}: {}",
                    source, destination, e
                ))
            })?;
        log::info!("Connected {} -> {}", source, destination);
        return Ok(());
    }

    fn link(&self) -> Arc<LinkState> {
        self.link.clone()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.link.set_activated(false);
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        client
            .deactivate()
            .map_err(|e| AppError::transport(&format!("Error closing JACK connection: {}", e)))?;
        log::info!("JACK connection closed");
        return Ok(());
    }
}

impl Drop for JackTransport {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("{}", e);
        }
    }
}
