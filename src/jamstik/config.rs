use crate::error::{AppError, ErrorType};

use super::{
    NAME_OFFSET, NAME_SIZE, OPCODE_OFFSET, Opcode, ParamName, SCHEMA_BODY_OFFSET,
    SYSEX_DUMMY_LENGTH, SYSEX_END, SYSEX_HEADER_SIZE, SYSEX_START, SYSEX_TAIL_SIZE, TYPE_OFFSET,
    VALUE_OFFSET, VENDOR_ID,
    packed::{self, PackedValue, TypeError, ValueType},
    schema::{Parameter, SchemaStore},
};

type Result<T> = std::result::Result<T, AppError>;

// Frame builders /////////////////////////////////////////////////////////

fn build_frame(opcode: Opcode, name: &ParamName, payload: &[u8]) -> Vec<u8> {
    let mut frame =
        Vec::with_capacity(SYSEX_HEADER_SIZE + NAME_SIZE + payload.len() + SYSEX_TAIL_SIZE);
    frame.push(SYSEX_START);
    frame.extend_from_slice(&VENDOR_ID);
    frame.push(opcode.into());
    frame.extend_from_slice(name.as_bytes());
    frame.extend_from_slice(payload);
    frame.push(SYSEX_DUMMY_LENGTH);
    frame.push(SYSEX_END);
    return frame;
}

/// Schema request. Without a name the whole schema is requested.
pub fn build_schema_query(name: Option<&ParamName>) -> Vec<u8> {
    build_frame(Opcode::SchemaQuery, name.unwrap_or(&ParamName::ZERO), &[])
}

pub fn build_config_query(category: &ParamName) -> Vec<u8> {
    build_frame(Opcode::ConfigQuery, category, &[])
}

/// Value update. `value` is re-encoded with the declared type, so a value
/// of another numeric kind is accepted as long as it fits.
pub fn build_config_set(
    name: &ParamName,
    value_type: ValueType,
    value: &PackedValue,
) -> std::result::Result<Vec<u8>, TypeError> {
    if !value_type.is_numeric() {
        return Err(TypeError {
            message: format!("cannot set {} values", value_type),
        });
    }
    let integer = value.as_i128()?;
    let encoded = packed::encode_integer(value_type, integer).map_err(|e| TypeError {
        message: e.to_string(),
    })?;
    let mut payload = Vec::with_capacity(1 + encoded.len());
    payload.push(value_type.into());
    payload.extend_from_slice(&encoded);
    return Ok(build_frame(Opcode::ConfigSet, name, &payload));
}

// Reply parsing //////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    SchemaReturn,
    ConfigReturn,
    ConfigSetReturn,
    ConfigDone,
    /// A vendor frame carrying a command we never expect to receive
    Unexpected(Opcode),
    UnknownCommand(u8),
    /// Some other SysEx, or a truncated one
    Foreign,
}

pub fn parse_reply(frame: &[u8]) -> Reply {
    if frame.len() < SYSEX_HEADER_SIZE + 1
        || frame[0] != SYSEX_START
        || frame[1..OPCODE_OFFSET] != VENDOR_ID
        || frame[frame.len() - 1] != SYSEX_END
    {
        return Reply::Foreign;
    }
    let command = frame[OPCODE_OFFSET];
    let Ok(opcode) = Opcode::try_from(command) else {
        return Reply::UnknownCommand(command);
    };
    return match opcode {
        Opcode::SchemaReturn => Reply::SchemaReturn,
        Opcode::ConfigReturn => Reply::ConfigReturn,
        Opcode::ConfigSetReturn => Reply::ConfigSetReturn,
        Opcode::ConfigDone => Reply::ConfigDone,
        _ => Reply::Unexpected(opcode),
    };
}

/// JSON body of a SchemaReturn frame.
pub fn schema_body(frame: &[u8]) -> Result<&[u8]> {
    if frame.len() < SCHEMA_BODY_OFFSET + SYSEX_TAIL_SIZE {
        return Err(AppError::new(
            ErrorType::FramingError,
            format!("schema frame too short; {} bytes", frame.len()),
        ));
    }
    return Ok(&frame[SCHEMA_BODY_OFFSET..frame.len() - SYSEX_TAIL_SIZE]);
}

/// Decodes a ConfigReturn or ConfigSetReturn frame and stores the value
/// into the matching parameter. Unknown names get a synthesized entry and
/// a declared type that disagrees with the schema replaces it.
pub fn decode_value<'a>(store: &'a mut SchemaStore, frame: &[u8]) -> Result<&'a Parameter> {
    if frame.len() < VALUE_OFFSET + SYSEX_TAIL_SIZE {
        return Err(AppError::new(
            ErrorType::CodecError,
            format!("value frame too short; {} bytes", frame.len()),
        ));
    }
    let Some(name) = ParamName::from_bytes(&frame[NAME_OFFSET..NAME_OFFSET + NAME_SIZE]) else {
        return Err(AppError::new(
            ErrorType::CodecError,
            format!(
                "invalid parameter name {}",
                hex::encode(&frame[NAME_OFFSET..NAME_OFFSET + NAME_SIZE])
            ),
        ));
    };
    let type_code = frame[TYPE_OFFSET];
    let Ok(value_type) = ValueType::try_from(type_code) else {
        return Err(AppError::new(
            ErrorType::CodecError,
            format!("invalid type code {} for {}", type_code, name),
        ));
    };

    let value_bytes = &frame[VALUE_OFFSET..frame.len() - SYSEX_TAIL_SIZE];
    if let Some(width) = value_type.width() {
        if value_bytes.len() < width {
            return Err(AppError::new(
                ErrorType::CodecError,
                format!(
                    "{} frame for {} is {} bytes, expected {}",
                    value_type,
                    name,
                    frame.len(),
                    VALUE_OFFSET + width + SYSEX_TAIL_SIZE
                ),
            ));
        }
    }
    let value = packed::decode(value_type, value_bytes)?;

    if store.find_by_name(&name).is_none() {
        log::warn!("Value for {} which is not in the schema", name);
        store.add_synthesized(name, value_type);
    }
    let Some(parameter) = store.find_by_name_mut(&name) else {
        return Err(AppError::runtime("parameter vanished from the schema"));
    };
    if parameter.value_type != value_type {
        log::warn!(
            "Type of {} changed from {} to {}",
            name,
            parameter.value_type,
            value_type
        );
        parameter.value_type = value_type;
    }
    log::debug!("{} = {}", name, value);
    parameter.current_value = Some(value);
    return Ok(parameter);
}
