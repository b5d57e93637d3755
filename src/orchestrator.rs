use std::time::Duration;

use tokio::{
    signal::unix::{SignalKind, signal},
    sync::mpsc::Receiver,
    time::MissedTickBehavior,
};

use crate::{
    command::{Command, NumberEntry},
    decoder::MidiDecoder,
    error::{AppError, ErrorType},
    guitar::GuitarModel,
    jamstik::{
        GUITAR_STRINGS, ParamName, SYSEX_START,
        config::{self, Reply},
        packed::PackedValue,
        schema::SchemaStore,
    },
    queue::EventProducer,
    settings::ParameterNames,
    transport::ControlEndpoints,
};

type Result<T> = std::result::Result<T, AppError>;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for both directions to be connected
    Start,
    AwaitSchema,
    /// Dumping the values of the category at this index
    DumpCategory(usize),
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Control side of the device session
pub struct Orchestrator {
    phase: Phase,
    store: SchemaStore,
    guitar: GuitarModel,
    decoder: MidiDecoder,
    entry: NumberEntry,
    selected_string: usize,
    names: ParameterNames,
}

impl Orchestrator {
    pub fn new(names: ParameterNames) -> Self {
        Self {
            phase: Phase::Start,
            store: SchemaStore::new(),
            guitar: GuitarModel::new(),
            decoder: MidiDecoder::new(),
            entry: NumberEntry::new(),
            selected_string: 0,
            names,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn store(&self) -> &SchemaStore {
        &self.store
    }

    pub fn guitar(&self) -> &GuitarModel {
        &self.guitar
    }

    pub fn selected_string(&self) -> usize {
        self.selected_string
    }

    /// Requests the schema. Does nothing once the session has started.
    pub fn start(&mut self, outbound: &mut EventProducer) -> Result<()> {
        if self.phase != Phase::Start {
            return Ok(());
        }
        outbound.push(&config::build_schema_query(None))?;
        self.phase = Phase::AwaitSchema;
        log::info!("Schema requested");
        return Ok(());
    }

    // Device events //////////////////////////////////////////////////////

    /// Handles one complete event from the device. Errors are fatal to the
    /// session.
    pub fn handle_event(&mut self, event: &[u8], outbound: &mut EventProducer) -> Result<()> {
        let Some(&status) = event.first() else {
            return Ok(());
        };
        if status != SYSEX_START {
            self.decoder.handle(event, &mut self.guitar);
            log::debug!("\n{}", self.guitar);
            return Ok(());
        }

        match config::parse_reply(event) {
            Reply::SchemaReturn => self.handle_schema(event, outbound)?,
            Reply::ConfigReturn | Reply::ConfigSetReturn => self.handle_value(event),
            Reply::ConfigDone => self.handle_config_done(outbound)?,
            Reply::Unexpected(opcode) => {
                log::warn!("Unexpected command {:?} from the device", opcode);
            }
            Reply::UnknownCommand(command) => {
                log::warn!("Unknown command {:02x} from the device", command);
            }
            Reply::Foreign => {
                log::debug!("Ignoring SysEx {}", hex::encode(event));
            }
        }
        return Ok(());
    }

    fn handle_schema(&mut self, event: &[u8], outbound: &mut EventProducer) -> Result<()> {
        if self.phase != Phase::AwaitSchema {
            log::warn!("Unsolicited schema in phase {:?}; ignored", self.phase);
            return Ok(());
        }
        let body = config::schema_body(event)?;
        let count = self.store.load_schema(body)?;
        log::info!(
            "Schema loaded; {} parameters in {} categories",
            count,
            self.store.list_categories().len()
        );
        return self.query_category(0, outbound);
    }

    fn query_category(&mut self, index: usize, outbound: &mut EventProducer) -> Result<()> {
        let Some(category) = self.store.list_categories().get(index) else {
            self.phase = Phase::Idle;
            log::info!("All parameters loaded\n{}", self.guitar);
            return Ok(());
        };
        outbound.push(&config::build_config_query(category))?;
        log::debug!("Requested values of {}", category);
        self.phase = Phase::DumpCategory(index);
        return Ok(());
    }

    fn handle_value(&mut self, event: &[u8]) {
        if !self.store.is_loaded() {
            log::warn!("Value received before the schema; ignored");
            return;
        }
        let parameter = match config::decode_value(&mut self.store, event) {
            Ok(parameter) => parameter,
            Err(e) => {
                log::warn!("Dropped value frame: {}", e);
                return;
            }
        };
        if let Some(value) = &parameter.current_value {
            if self.phase == Phase::Idle {
                log::info!("{} is now {}", parameter.name, value);
            }
            self.guitar.apply_parameter(&parameter.name, value);
        }
    }

    fn handle_config_done(&mut self, outbound: &mut EventProducer) -> Result<()> {
        let Phase::DumpCategory(index) = self.phase else {
            log::debug!("Config done in phase {:?}", self.phase);
            return Ok(());
        };
        return self.query_category(index + 1, outbound);
    }

    // User commands //////////////////////////////////////////////////////

    pub fn handle_command(
        &mut self,
        command: Command,
        outbound: &mut EventProducer,
    ) -> Result<Flow> {
        match command {
            Command::Digit(digit) => {
                self.entry.push_digit(digit);
                log::info!("Entry: {}", self.entry);
            }
            Command::Minus => {
                self.entry.minus();
                log::info!("Entry: {}", self.entry);
            }
            Command::ClearEntry => {
                self.entry.clear();
                log::info!("Entry cleared");
            }
            Command::SelectString(string) => {
                if string < GUITAR_STRINGS {
                    self.selected_string = string;
                    log::info!("String {} selected", string + 1);
                }
            }
            Command::Quit => return Ok(Flow::Quit),
            Command::Toggle(toggle) => {
                let name = self.names.toggle(toggle);
                self.toggle(name, outbound);
            }
            Command::Set(setting) => {
                let name = self.names.setting(setting);
                self.set_from_entry(name, outbound);
            }
            Command::SetString(setting) => {
                let name = self.names.string_setting(setting, self.selected_string);
                self.set_from_entry(name, outbound);
            }
        }
        return Ok(Flow::Continue);
    }

    fn ready_for_settings(&self) -> bool {
        if self.phase != Phase::Idle {
            log::warn!("Device parameters are not loaded yet; command ignored");
            return false;
        }
        return true;
    }

    fn toggle(&self, name: Option<ParamName>, outbound: &mut EventProducer) {
        if !self.ready_for_settings() {
            return;
        }
        let Some(name) = name else {
            log::warn!("No parameter is configured for this command");
            return;
        };
        let Some(parameter) = self.store.find_by_name(&name) else {
            log::warn!("{} is not in the schema", name);
            return;
        };
        let current = match parameter.current_value.as_ref().map(|v| v.is_yes()) {
            Some(Ok(current)) => current,
            Some(Err(e)) => {
                log::warn!("Cannot toggle {}: {}", name, e);
                return;
            }
            None => false,
        };
        self.send_set(name, if current { 0 } else { 1 }, outbound);
    }

    fn set_from_entry(&mut self, name: Option<ParamName>, outbound: &mut EventProducer) {
        if !self.ready_for_settings() {
            return;
        }
        let Some(value) = self.entry.value() else {
            log::warn!("Type a number first");
            return;
        };
        self.entry.clear();
        let Some(name) = name else {
            log::warn!("No parameter is configured for this command");
            return;
        };
        self.send_set(name, value as i128, outbound);
    }

    fn send_set(&self, name: ParamName, value: i128, outbound: &mut EventProducer) {
        let Some(parameter) = self.store.find_by_name(&name) else {
            log::warn!("{} is not in the schema", name);
            return;
        };
        if !parameter.in_range(value) {
            log::warn!(
                "{} out of range for {}; must be within [{}, {}]",
                value,
                name,
                parameter.low,
                parameter.high
            );
            return;
        }
        let value_type = parameter.value_type;
        let frame = match PackedValue::from_integer(value_type, value) {
            Ok(packed) => config::build_config_set(&name, value_type, &packed),
            Err(e) => {
                log::warn!("Cannot set {}: {}", name, e);
                return;
            }
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Cannot set {}: {}", name, e);
                return;
            }
        };
        match outbound.push(&frame) {
            Ok(()) => log::info!("Setting {} to {}", name, value),
            Err(e) => log::error!("Failed to send {}: {}", name, e),
        }
    }

    // Control loop ///////////////////////////////////////////////////////

    /// Checks the link and handles whatever the device has sent.
    fn service(&mut self, endpoints: &mut ControlEndpoints) -> Result<Flow> {
        if !endpoints.link.is_activated() {
            log::info!("Transport deactivated");
            return Ok(Flow::Quit);
        }
        let dropped = endpoints.link.take_dropped();
        if dropped > 0 {
            log::warn!("{} incoming events dropped", dropped);
        }
        while let Some(event) = endpoints.inbound.pop() {
            self.handle_event(&event, &mut endpoints.outbound)?;
        }
        if self.phase == Phase::Start {
            if endpoints.link.is_ready() {
                self.start(&mut endpoints.outbound)?;
            } else {
                log::debug!(
                    "Waiting for the device; ready={:02b}",
                    endpoints.link.ready_bits()
                );
            }
        }
        return Ok(Flow::Continue);
    }

    /// Runs the session until the user quits, a termination signal
    /// arrives, the transport goes away or a fatal error occurs.
    pub async fn run(
        &mut self,
        endpoints: &mut ControlEndpoints,
        command_rx: &mut Receiver<Command>,
    ) -> Result<()> {
        let mut hangup = signal(SignalKind::hangup())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut input_open = true;

        let result = loop {
            let step = tokio::select! {
                biased;
                rung = endpoints.doorbell.wait() => match rung {
                    Ok(_) => self.service(endpoints),
                    Err(e) => Err(AppError::new(
                        ErrorType::RuntimeError,
                        format!("doorbell failed: {}", e),
                    )),
                },
                command = command_rx.recv(), if input_open => match command {
                    Some(command) => self.handle_command(command, &mut endpoints.outbound),
                    None => {
                        log::debug!("Keyboard input closed");
                        input_open = false;
                        Ok(Flow::Continue)
                    }
                },
                _ = tick.tick() => self.service(endpoints),
                _ = hangup.recv() => {
                    log::info!("SIGHUP received");
                    Ok(Flow::Quit)
                }
                _ = interrupt.recv() => {
                    log::info!("SIGINT received");
                    Ok(Flow::Quit)
                }
                _ = terminate.recv() => {
                    log::info!("SIGTERM received");
                    Ok(Flow::Quit)
                }
            };
            match step {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        endpoints.link.set_activated(false);
        return result;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        command::{Setting, StringSetting, Toggle},
        framer::FrameSink,
        jamstik::{
            MPE_MODE, Opcode, PTCHBCEN, PTCHBSEM, SYSEX_DUMMY_LENGTH, SYSEX_END, VENDOR_ID,
            packed::{self, ValueType},
        },
        queue::{self, EventConsumer},
        transport::{self, LinkState, READY_BOTH, READY_INBOUND, READY_OUTBOUND},
    };
    use std::sync::Arc;
    use tokio::sync::mpsc::channel;

    const SCHEMA: &str = r#"{"Schema": [
        {"CC": "MPE_MODE", "Desc": "MPE", "Typ": 0, "Lo": 0, "Hi": 1, "TT": 0, "Cat": "MIDI____"},
        {"CC": "PTCHBSEM", "Desc": "Bend semitones", "Typ": 7, "Lo": 0, "Hi": 96, "Cat": "MIDI____"},
        {"CC": "PTCHBCEN", "Desc": "Bend cents", "Typ": 7, "Lo": 0, "Hi": 99, "Cat": "MIDI____"},
        {"CC": "TRIGGR_1", "Desc": "Trigger", "Typ": 3, "Lo": -100, "Hi": 100, "Cat": "STRINGS_"},
        {"CC": "TRIGGR_2", "Desc": "Trigger", "Typ": 3, "Lo": -100, "Hi": 100, "Cat": "STRINGS_"}
    ]}"#;

    fn frame(opcode: Opcode, name: &ParamName, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![SYSEX_START];
        frame.extend_from_slice(&VENDOR_ID);
        frame.push(opcode.into());
        frame.extend_from_slice(name.as_bytes());
        frame.extend_from_slice(payload);
        frame.push(SYSEX_DUMMY_LENGTH);
        frame.push(SYSEX_END);
        frame
    }

    fn schema_frame() -> Vec<u8> {
        frame(Opcode::SchemaReturn, &ParamName::ZERO, SCHEMA.as_bytes())
    }

    fn value_frame(opcode: Opcode, name: &ParamName, value_type: ValueType, value: i128) -> Vec<u8> {
        let mut payload = vec![value_type.into()];
        payload.extend(packed::encode_integer(value_type, value).unwrap());
        frame(opcode, name, &payload)
    }

    fn done_frame() -> Vec<u8> {
        frame(Opcode::ConfigDone, &ParamName::ZERO, &[])
    }

    fn sent(consumer: &mut EventConsumer) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Some(frame) = consumer.pop() {
            frames.push(frame);
        }
        frames
    }

    fn trigger(string: u8) -> ParamName {
        ParamName::new([b'T', b'R', b'I', b'G', b'G', b'R', b'_', b'0' + string])
    }

    /// Drives a session up to Idle with MPE off and a 2 semitone bend range
    fn loaded() -> (Orchestrator, EventProducer, EventConsumer) {
        let mut orchestrator = Orchestrator::new(ParameterNames::default());
        let (mut outbound, mut device) = queue::channel();
        orchestrator.start(&mut outbound).unwrap();
        orchestrator
            .handle_event(&schema_frame(), &mut outbound)
            .unwrap();
        for event in [
            value_frame(Opcode::ConfigReturn, &MPE_MODE, ValueType::U7, 0),
            value_frame(Opcode::ConfigReturn, &PTCHBSEM, ValueType::U16, 2),
            value_frame(Opcode::ConfigReturn, &PTCHBCEN, ValueType::U16, 0),
            done_frame(),
            value_frame(Opcode::ConfigReturn, &trigger(1), ValueType::I32, 10),
            value_frame(Opcode::ConfigReturn, &trigger(2), ValueType::I32, -10),
            done_frame(),
        ] {
            orchestrator.handle_event(&event, &mut outbound).unwrap();
        }
        assert_eq!(orchestrator.phase(), Phase::Idle);
        sent(&mut device);
        (orchestrator, outbound, device)
    }

    #[test]
    fn test_category_dump() {
        let mut orchestrator = Orchestrator::new(ParameterNames::default());
        let (mut outbound, mut device) = queue::channel();
        assert_eq!(orchestrator.phase(), Phase::Start);

        orchestrator.start(&mut outbound).unwrap();
        assert_eq!(orchestrator.phase(), Phase::AwaitSchema);
        assert_eq!(sent(&mut device), vec![config::build_schema_query(None)]);
        orchestrator.start(&mut outbound).unwrap();
        assert!(device.is_empty());

        orchestrator
            .handle_event(&schema_frame(), &mut outbound)
            .unwrap();
        assert_eq!(orchestrator.phase(), Phase::DumpCategory(0));
        let midi = ParamName::new(*b"MIDI____");
        let strings = ParamName::new(*b"STRINGS_");
        assert_eq!(sent(&mut device), vec![config::build_config_query(&midi)]);

        // values do not advance the dump
        let event = value_frame(Opcode::ConfigReturn, &MPE_MODE, ValueType::U7, 1);
        orchestrator.handle_event(&event, &mut outbound).unwrap();
        assert_eq!(orchestrator.phase(), Phase::DumpCategory(0));
        assert!(device.is_empty());
        assert_eq!(orchestrator.guitar().mode(), crate::guitar::GuitarMode::Mpe);

        orchestrator
            .handle_event(&done_frame(), &mut outbound)
            .unwrap();
        assert_eq!(orchestrator.phase(), Phase::DumpCategory(1));
        assert_eq!(sent(&mut device), vec![config::build_config_query(&strings)]);

        orchestrator
            .handle_event(&done_frame(), &mut outbound)
            .unwrap();
        assert_eq!(orchestrator.phase(), Phase::Idle);
        assert!(device.is_empty());

        // stray done in Idle changes nothing
        orchestrator
            .handle_event(&done_frame(), &mut outbound)
            .unwrap();
        assert_eq!(orchestrator.phase(), Phase::Idle);
    }

    #[test]
    fn test_empty_schema_goes_idle() {
        let mut orchestrator = Orchestrator::new(ParameterNames::default());
        let (mut outbound, mut device) = queue::channel();
        orchestrator.start(&mut outbound).unwrap();
        sent(&mut device);
        let event = frame(Opcode::SchemaReturn, &ParamName::ZERO, br#"{"Schema": []}"#);
        orchestrator.handle_event(&event, &mut outbound).unwrap();
        assert_eq!(orchestrator.phase(), Phase::Idle);
        assert!(device.is_empty());
    }

    #[test]
    fn test_values_after_empty_schema() {
        let mut orchestrator = Orchestrator::new(ParameterNames::default());
        let (mut outbound, _device) = queue::channel();
        orchestrator.start(&mut outbound).unwrap();
        let event = frame(Opcode::SchemaReturn, &ParamName::ZERO, br#"{"Schema": []}"#);
        orchestrator.handle_event(&event, &mut outbound).unwrap();
        assert_eq!(orchestrator.phase(), Phase::Idle);

        let reply = value_frame(Opcode::ConfigSetReturn, &MPE_MODE, ValueType::U7, 1);
        orchestrator.handle_event(&reply, &mut outbound).unwrap();
        let Some(parameter) = orchestrator.store().find_by_name(&MPE_MODE) else {
            panic!("MPE_MODE must be synthesized");
        };
        assert_eq!(parameter.current_value, Some(PackedValue::U7(1)));
        assert_eq!(orchestrator.guitar().mode(), crate::guitar::GuitarMode::Mpe);
    }

    #[test]
    fn test_done_before_schema_is_ignored() {
        let mut orchestrator = Orchestrator::new(ParameterNames::default());
        let (mut outbound, mut device) = queue::channel();
        orchestrator.start(&mut outbound).unwrap();
        sent(&mut device);
        orchestrator
            .handle_event(&done_frame(), &mut outbound)
            .unwrap();
        assert_eq!(orchestrator.phase(), Phase::AwaitSchema);
        assert!(device.is_empty());

        // the schema is still accepted afterwards
        orchestrator
            .handle_event(&schema_frame(), &mut outbound)
            .unwrap();
        assert_eq!(orchestrator.phase(), Phase::DumpCategory(0));
    }

    #[test]
    fn test_bad_schema_is_fatal() {
        let mut orchestrator = Orchestrator::new(ParameterNames::default());
        let (mut outbound, _device) = queue::channel();
        orchestrator.start(&mut outbound).unwrap();
        let event = frame(Opcode::SchemaReturn, &ParamName::ZERO, b"{\"Schema\": 1}");
        let Err(e) = orchestrator.handle_event(&event, &mut outbound) else {
            panic!("a broken schema must end the session");
        };
        assert_eq!(e.error_type, ErrorType::SchemaError);
    }

    #[test]
    fn test_schema_query_on_full_queue_is_fatal() {
        let mut orchestrator = Orchestrator::new(ParameterNames::default());
        let (mut outbound, _device) = queue::channel();
        while !outbound.is_full() {
            outbound.push(&[0xFE]).unwrap();
        }
        let Err(e) = orchestrator.start(&mut outbound) else {
            panic!("the schema query must fail");
        };
        assert_eq!(e.error_type, ErrorType::QueueFull);
    }

    #[test]
    fn test_values_before_schema_are_ignored() {
        let mut orchestrator = Orchestrator::new(ParameterNames::default());
        let (mut outbound, device) = queue::channel();
        let event = value_frame(Opcode::ConfigReturn, &MPE_MODE, ValueType::U7, 1);
        orchestrator.handle_event(&event, &mut outbound).unwrap();
        assert!(orchestrator.store().find_by_name(&MPE_MODE).is_none());
        // an unsolicited schema is not loaded either
        orchestrator
            .handle_event(&schema_frame(), &mut outbound)
            .unwrap();
        assert!(!orchestrator.store().is_loaded());
        assert!(device.is_empty());
        assert_eq!(orchestrator.phase(), Phase::Start);
    }

    #[test]
    fn test_performance_events() {
        let (mut orchestrator, mut outbound, _device) = loaded();
        orchestrator
            .handle_event(&[0x90, 64, 100], &mut outbound)
            .unwrap();
        orchestrator
            .handle_event(&[0xE0, 0x7F, 0x7F], &mut outbound)
            .unwrap();
        let strings = orchestrator.guitar().strings();
        assert_eq!(strings[0].note, Some(64));
        assert_eq!(strings[1].bend, 335503);
    }

    #[test]
    fn test_bend_cents_reply() {
        let (mut orchestrator, mut outbound, _device) = loaded();
        assert_eq!(orchestrator.guitar().bend_range(), (2, 0));
        let reply = value_frame(Opcode::ConfigSetReturn, &PTCHBCEN, ValueType::U16, 50);
        orchestrator.handle_event(&reply, &mut outbound).unwrap();
        assert_eq!(orchestrator.guitar().bend_range(), (2, 50));
        orchestrator
            .handle_event(&[0x90, 64, 100], &mut outbound)
            .unwrap();
        orchestrator
            .handle_event(&[0xE0, 0x7F, 0x7F], &mut outbound)
            .unwrap();
        assert_eq!(orchestrator.guitar().strings()[1].bend, 8191 * 8192 / 250);
    }

    #[test]
    fn test_toggle() {
        let (mut orchestrator, mut outbound, mut device) = loaded();
        let flow = orchestrator
            .handle_command(Command::Toggle(Toggle::Mpe), &mut outbound)
            .unwrap();
        assert_eq!(flow, Flow::Continue);
        let expected =
            config::build_config_set(&MPE_MODE, ValueType::U7, &PackedValue::U7(1)).unwrap();
        assert_eq!(sent(&mut device), vec![expected]);

        let reply = value_frame(Opcode::ConfigSetReturn, &MPE_MODE, ValueType::U7, 1);
        orchestrator.handle_event(&reply, &mut outbound).unwrap();
        assert_eq!(orchestrator.guitar().mode(), crate::guitar::GuitarMode::Mpe);

        orchestrator
            .handle_command(Command::Toggle(Toggle::Mpe), &mut outbound)
            .unwrap();
        let expected =
            config::build_config_set(&MPE_MODE, ValueType::U7, &PackedValue::U7(0)).unwrap();
        assert_eq!(sent(&mut device), vec![expected]);

        // not in the schema
        orchestrator
            .handle_command(Command::Toggle(Toggle::Expression), &mut outbound)
            .unwrap();
        assert!(device.is_empty());
    }

    #[test]
    fn test_numeric_set() {
        let (mut orchestrator, mut outbound, mut device) = loaded();
        for command in [Command::Digit(1), Command::Digit(2), Command::Set(Setting::BendSemitones)] {
            orchestrator.handle_command(command, &mut outbound).unwrap();
        }
        let expected =
            config::build_config_set(&PTCHBSEM, ValueType::U16, &PackedValue::U16(12)).unwrap();
        assert_eq!(sent(&mut device), vec![expected]);

        // the entry was consumed
        orchestrator
            .handle_command(Command::Set(Setting::BendSemitones), &mut outbound)
            .unwrap();
        assert!(device.is_empty());

        // out of range
        for command in [Command::Digit(9), Command::Digit(7), Command::Set(Setting::BendSemitones)] {
            orchestrator.handle_command(command, &mut outbound).unwrap();
        }
        assert!(device.is_empty());
    }

    #[test]
    fn test_per_string_set() {
        let (mut orchestrator, mut outbound, mut device) = loaded();
        for command in [
            Command::SelectString(1),
            Command::Digit(5),
            Command::Minus,
            Command::SetString(StringSetting::Trigger),
        ] {
            orchestrator.handle_command(command, &mut outbound).unwrap();
        }
        assert_eq!(orchestrator.selected_string(), 1);
        let expected =
            config::build_config_set(&trigger(2), ValueType::I32, &PackedValue::I32(-5)).unwrap();
        assert_eq!(sent(&mut device), vec![expected]);

        // open notes are not in this schema
        for command in [Command::Digit(5), Command::SetString(StringSetting::OpenNote)] {
            orchestrator.handle_command(command, &mut outbound).unwrap();
        }
        assert!(device.is_empty());
    }

    #[test]
    fn test_commands_wait_for_idle() {
        let mut orchestrator = Orchestrator::new(ParameterNames::default());
        let (mut outbound, device) = queue::channel();
        orchestrator
            .handle_command(Command::Toggle(Toggle::Mpe), &mut outbound)
            .unwrap();
        orchestrator
            .handle_command(Command::Digit(3), &mut outbound)
            .unwrap();
        orchestrator
            .handle_command(Command::Set(Setting::Transpose), &mut outbound)
            .unwrap();
        assert!(device.is_empty());
        assert_eq!(
            orchestrator
                .handle_command(Command::Quit, &mut outbound)
                .unwrap(),
            Flow::Quit
        );
    }

    struct VecSink {
        frames: Vec<Vec<u8>>,
    }

    impl FrameSink for VecSink {
        fn space(&self) -> usize {
            4096
        }

        fn write(&mut self, bytes: &[u8]) -> bool {
            self.frames.push(bytes.to_vec());
            true
        }
    }

    #[tokio::test]
    async fn test_run_until_quit() {
        let link = Arc::new(LinkState::new());
        let (mut bridge, mut endpoints) = transport::endpoints(link.clone()).unwrap();
        let (command_tx, mut command_rx) = channel(8);
        link.set_activated(true);
        link.update_ready(READY_INBOUND, true);
        assert_eq!(link.update_ready(READY_OUTBOUND, true), READY_BOTH);

        let device = async {
            let mut replies: Vec<Vec<u8>> = Vec::new();
            loop {
                let mut out = VecSink { frames: Vec::new() };
                let frames: Vec<&[u8]> = replies.iter().map(|r| r.as_slice()).collect();
                bridge.process(frames, &mut out, None::<&mut VecSink>);
                replies.clear();
                if out.frames.iter().any(|f| f.len() > 4 && f[4] == 0x44) {
                    replies.push(schema_frame());
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let frames: Vec<&[u8]> = replies.iter().map(|r| r.as_slice()).collect();
            bridge.process(frames, &mut VecSink { frames: Vec::new() }, None::<&mut VecSink>);
            tokio::time::sleep(Duration::from_millis(200)).await;
            command_tx.send(Command::Quit).await.unwrap();
        };

        let mut orchestrator = Orchestrator::new(ParameterNames::default());
        let (result, _) = tokio::join!(
            orchestrator.run(&mut endpoints, &mut command_rx),
            device
        );
        assert!(result.is_ok());
        assert_eq!(orchestrator.phase(), Phase::DumpCategory(0));
        assert!(!link.is_activated());
    }

    #[tokio::test]
    async fn test_run_ends_on_deactivation() {
        let link = Arc::new(LinkState::new());
        let (_bridge, mut endpoints) = transport::endpoints(link.clone()).unwrap();
        let (_command_tx, mut command_rx) = channel(8);
        let mut orchestrator = Orchestrator::new(ParameterNames::default());
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            orchestrator.run(&mut endpoints, &mut command_rx),
        )
        .await
        .unwrap();
        assert!(result.is_ok());
        assert_eq!(orchestrator.phase(), Phase::Start);
    }
}
