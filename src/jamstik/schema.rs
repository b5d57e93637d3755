use std::collections::HashMap;
use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Deserialize;

use super::{
    ParamName,
    packed::{PackedValue, ValueType},
};

#[derive(Debug, Clone)]
pub struct SchemaError {
    pub message: String,
}

impl SchemaError {
    fn new(message: String) -> Self {
        Self { message }
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "schema error: {}", self.message)
    }
}

impl std::error::Error for SchemaError {}

type Result<T> = std::result::Result<T, SchemaError>;

/// How a front end should present a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ControlHint {
    Checkbox = 0,
    Spinner = 1,
    DecimalEntry = 2,
    HexDisplay = 3,
    DecimalDisplay = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParamFlags(u32);

impl ParamFlags {
    pub const ENGINEERING: ParamFlags = ParamFlags(1 << 0);
    pub const ADVANCED: ParamFlags = ParamFlags(1 << 1);
    pub const CRITICAL: ParamFlags = ParamFlags(1 << 2);
    pub const BETA: ParamFlags = ParamFlags(1 << 3);
    pub const NEVER_SHOW: ParamFlags = ParamFlags(1 << 4);
    pub const WIFI_ONLY: ParamFlags = ParamFlags(1 << 5);
    pub const BT_ONLY: ParamFlags = ParamFlags(1 << 6);

    const NAMES: [(ParamFlags, &'static str); 7] = [
        (Self::ENGINEERING, "engineering"),
        (Self::ADVANCED, "advanced"),
        (Self::CRITICAL, "critical"),
        (Self::BETA, "beta"),
        (Self::NEVER_SHOW, "never-show"),
        (Self::WIFI_ONLY, "wifi-only"),
        (Self::BT_ONLY, "bt-only"),
    ];

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: ParamFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl fmt::Display for ParamFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", names.join("|"))
    }
}

/// One configurable parameter of the device
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: ParamName,
    pub description: String,
    pub value_type: ValueType,
    pub low: i128,
    pub high: i128,
    pub step: i128,
    pub control_hint: Option<ControlHint>,
    pub category: Option<usize>,
    pub flags: ParamFlags,
    /// Created from a value frame, not declared by the schema
    pub synthesized: bool,
    pub current_value: Option<PackedValue>,
}

impl Parameter {
    fn synthesized(name: ParamName, value_type: ValueType) -> Self {
        Self {
            name,
            description: String::new(),
            value_type,
            low: value_type.min(),
            high: value_type.max(),
            step: 1,
            control_hint: None,
            category: None,
            flags: ParamFlags::default(),
            synthesized: true,
            current_value: None,
        }
    }

    pub fn in_range(&self, value: i128) -> bool {
        value >= self.low && value <= self.high
    }
}

// JSON document //////////////////////////////////////////////////////////

const KNOWN_FIELDS: [&str; 9] = ["CC", "Desc", "Typ", "Lo", "Hi", "Step", "TT", "Cat", "F"];

#[derive(Debug, Deserialize)]
struct SchemaDocument {
    #[serde(rename = "Schema")]
    schema: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SchemaEntry {
    #[serde(rename = "CC")]
    name: String,
    #[serde(rename = "Desc", default)]
    description: String,
    #[serde(rename = "Typ")]
    value_type: u8,
    #[serde(rename = "Lo")]
    low: Option<i128>,
    #[serde(rename = "Hi")]
    high: Option<i128>,
    #[serde(rename = "Step")]
    step: Option<i128>,
    #[serde(rename = "TT")]
    control_hint: Option<u8>,
    #[serde(rename = "Cat")]
    category: Option<String>,
    #[serde(rename = "F")]
    flags: Option<u32>,
}

// Store //////////////////////////////////////////////////////////////////

/// Parameter registry built from the device's JSON self-description
#[derive(Debug, Default)]
pub struct SchemaStore {
    parameters: Vec<Parameter>,
    index: HashMap<ParamName, usize>,
    categories: Vec<ParamName>,
    loaded: bool,
}

impl SchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current tables with the ones described by `body`.
    /// The store is left untouched when the document is rejected.
    pub fn load_schema(&mut self, body: &[u8]) -> Result<usize> {
        let document: SchemaDocument = serde_json::from_slice(body)
            .map_err(|e| SchemaError::new(format!("malformed schema document: {}", e)))?;

        let mut parameters = Vec::with_capacity(document.schema.len());
        let mut index = HashMap::new();
        let mut categories: Vec<ParamName> = Vec::new();

        for (position, item) in document.schema.into_iter().enumerate() {
            let serde_json::Value::Object(mut object) = item else {
                return Err(SchemaError::new(format!(
                    "entry {} is not an object",
                    position
                )));
            };
            object.retain(|key, _| {
                let known = KNOWN_FIELDS.contains(&key.as_str());
                if !known {
                    log::debug!("Unknown schema field {} in entry {}", key, position);
                }
                known
            });
            let entry: SchemaEntry = serde_json::from_value(serde_json::Value::Object(object))
                .map_err(|e| SchemaError::new(format!("entry {}: {}", position, e)))?;

            let Some(name) = ParamName::from_bytes(entry.name.as_bytes()) else {
                return Err(SchemaError::new(format!(
                    "entry {}: name {:?} is not 8 ASCII bytes",
                    position, entry.name
                )));
            };
            let Ok(value_type) = ValueType::try_from(entry.value_type) else {
                return Err(SchemaError::new(format!(
                    "entry {}: invalid type code {}",
                    position, entry.value_type
                )));
            };
            if index.contains_key(&name) {
                log::warn!("Duplicate parameter {} in schema, skipping", name);
                continue;
            }
            let category = match entry.category {
                Some(category) => {
                    let Some(category) = ParamName::from_bytes(category.as_bytes()) else {
                        return Err(SchemaError::new(format!(
                            "entry {}: category {:?} is not 8 ASCII bytes",
                            position, category
                        )));
                    };
                    match categories.iter().position(|known| *known == category) {
                        Some(found) => Some(found),
                        None => {
                            categories.push(category);
                            Some(categories.len() - 1)
                        }
                    }
                }
                None => None,
            };
            let control_hint = match entry.control_hint {
                Some(hint) => match ControlHint::try_from(hint) {
                    Ok(hint) => Some(hint),
                    Err(_) => {
                        log::debug!("Unknown control hint {} for {}", hint, name);
                        None
                    }
                },
                None => None,
            };

            index.insert(name, parameters.len());
            parameters.push(Parameter {
                name,
                description: entry.description,
                value_type,
                low: entry.low.unwrap_or(value_type.min()),
                high: entry.high.unwrap_or(value_type.max()),
                step: entry.step.unwrap_or(1),
                control_hint,
                category,
                flags: ParamFlags::from_bits(entry.flags.unwrap_or(0)),
                synthesized: false,
                current_value: None,
            });
        }

        self.parameters = parameters;
        self.index = index;
        self.categories = categories;
        self.loaded = true;
        log::info!(
            "Schema loaded; {} parameters in {} categories",
            self.parameters.len(),
            self.categories.len()
        );
        return Ok(self.parameters.len());
    }

    /// True once a schema document has been accepted, even an empty one.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn find_by_name(&self, name: &ParamName) -> Option<&Parameter> {
        let position = self.index.get(name)?;
        self.parameters.get(*position)
    }

    pub fn find_by_name_mut(&mut self, name: &ParamName) -> Option<&mut Parameter> {
        let position = self.index.get(name)?;
        self.parameters.get_mut(*position)
    }

    pub fn list_categories(&self) -> &[ParamName] {
        &self.categories
    }

    pub fn category_name(&self, parameter: &Parameter) -> Option<&ParamName> {
        self.categories.get(parameter.category?)
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter()
    }

    /// Inserts a placeholder for a parameter the schema did not declare.
    /// An existing entry is returned as is.
    pub fn add_synthesized(&mut self, name: ParamName, value_type: ValueType) -> &mut Parameter {
        let position = match self.index.get(&name) {
            Some(position) => *position,
            None => {
                self.parameters
                    .push(Parameter::synthesized(name, value_type));
                let position = self.parameters.len() - 1;
                self.index.insert(name, position);
                position
            }
        };
        &mut self.parameters[position]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jamstik::{MPE_MODE, PTCHBSEM};

    const SCHEMA: &str = r#"{
        "Schema": [
            {"CC": "MPE_MODE", "Desc": "MPE mode", "Typ": 0, "Lo": 0, "Hi": 1, "Step": 1,
             "TT": 0, "Cat": "MIDI____", "F": 0},
            {"CC": "PTCHBSEM", "Desc": "Pitch bend semitones", "Typ": 7, "Lo": 0, "Hi": 96,
             "Step": 1, "TT": 1, "Cat": "MIDI____", "F": 4},
            {"CC": "TRIGGR_1", "Desc": "Trigger sensitivity", "Typ": 3, "Lo": -100, "Hi": 100,
             "Cat": "STRINGS_", "F": 65, "Wi": 3},
            {"CC": "SERIALNO", "Typ": 4, "TT": 9}
        ]
    }"#;

    #[test]
    fn test_load_schema() {
        let mut store = SchemaStore::new();
        let Ok(count) = store.load_schema(SCHEMA.as_bytes()) else {
            panic!("schema must load");
        };
        assert_eq!(count, 4);

        let categories: Vec<String> = store
            .list_categories()
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(categories, vec!["MIDI____", "STRINGS_"]);

        let Some(mpe) = store.find_by_name(&MPE_MODE) else {
            panic!("MPE_MODE must be found");
        };
        assert_eq!(mpe.value_type, ValueType::U7);
        assert_eq!(mpe.control_hint, Some(ControlHint::Checkbox));
        assert_eq!(mpe.category, Some(0));
        assert!(!mpe.synthesized);
        assert!(mpe.current_value.is_none());

        let Some(bend) = store.find_by_name(&PTCHBSEM) else {
            panic!("PTCHBSEM must be found");
        };
        assert_eq!(bend.value_type, ValueType::U16);
        assert_eq!(bend.high, 96);
        assert!(bend.flags.contains(ParamFlags::CRITICAL));

        let trigger = store
            .find_by_name(&ParamName::new(*b"TRIGGR_1"))
            .unwrap();
        assert_eq!(trigger.low, -100);
        assert_eq!(trigger.category, Some(1));
        assert_eq!(trigger.flags.to_string(), "engineering|bt-only");
        assert_eq!(store.category_name(trigger).unwrap().to_string(), "STRINGS_");

        let serial = store
            .find_by_name(&ParamName::new(*b"SERIALNO"))
            .unwrap();
        assert_eq!(serial.control_hint, None);
        assert_eq!(serial.category, None);
        assert_eq!(serial.description, "");
    }

    #[test]
    fn test_reload_is_idempotent() {
        let mut store = SchemaStore::new();
        store.load_schema(SCHEMA.as_bytes()).unwrap();
        let first: Vec<(ParamName, ValueType, Option<usize>)> = store
            .parameters()
            .map(|p| (p.name, p.value_type, p.category))
            .collect();
        store.load_schema(SCHEMA.as_bytes()).unwrap();
        let second: Vec<(ParamName, ValueType, Option<usize>)> = store
            .parameters()
            .map(|p| (p.name, p.value_type, p.category))
            .collect();
        assert_eq!(first, second);
        assert_eq!(store.list_categories().len(), 2);
    }

    #[test]
    fn test_rejected_document_keeps_tables() {
        let mut store = SchemaStore::new();
        store.load_schema(SCHEMA.as_bytes()).unwrap();

        for document in [
            "not json",
            r#"{"Other": []}"#,
            r#"{"Schema": 5}"#,
            r#"{"Schema": [7]}"#,
            r#"{"Schema": [{"Typ": 0}]}"#,
            r#"{"Schema": [{"CC": "SHORT", "Typ": 0}]}"#,
            r#"{"Schema": [{"CC": "ABCDEFGH", "Typ": 42}]}"#,
            r#"{"Schema": [{"CC": "ABCDEFGH", "Typ": "u7"}]}"#,
            r#"{"Schema": [{"CC": "ABCDEFGH", "Typ": 0, "Cat": "X"}]}"#,
        ] {
            let Err(_) = store.load_schema(document.as_bytes()) else {
                panic!("{} must be rejected", document);
            };
        }
        assert_eq!(store.parameters().count(), 4);
        assert!(store.find_by_name(&MPE_MODE).is_some());
    }

    #[test]
    fn test_duplicate_name_is_skipped() {
        let mut store = SchemaStore::new();
        let document = r#"{"Schema": [
            {"CC": "MPE_MODE", "Typ": 0, "Desc": "first"},
            {"CC": "MPE_MODE", "Typ": 7, "Desc": "second"}
        ]}"#;
        assert_eq!(store.load_schema(document.as_bytes()).unwrap(), 1);
        assert_eq!(store.find_by_name(&MPE_MODE).unwrap().description, "first");
    }

    #[test]
    fn test_duplicate_does_not_add_category() {
        let mut store = SchemaStore::new();
        let document = r#"{"Schema": [
            {"CC": "MPE_MODE", "Typ": 0, "Cat": "MIDI____"},
            {"CC": "MPE_MODE", "Typ": 0, "Cat": "GHOST___"}
        ]}"#;
        assert_eq!(store.load_schema(document.as_bytes()).unwrap(), 1);
        assert_eq!(store.list_categories(), &[ParamName::new(*b"MIDI____")]);
        assert_eq!(store.find_by_name(&MPE_MODE).unwrap().category, Some(0));
    }

    #[test]
    fn test_empty_schema_is_loaded() {
        let mut store = SchemaStore::new();
        assert!(!store.is_loaded());
        store.add_synthesized(MPE_MODE, ValueType::U7);
        assert!(!store.is_loaded());
        assert_eq!(store.load_schema(br#"{"Schema": []}"#).unwrap(), 0);
        assert!(store.is_loaded());
        assert!(store.list_categories().is_empty());
    }

    #[test]
    fn test_add_synthesized() {
        let mut store = SchemaStore::new();
        let name = ParamName::new(*b"UNKNOWN_");
        let parameter = store.add_synthesized(name, ValueType::I16);
        assert!(parameter.synthesized);
        assert_eq!(parameter.low, -32768);
        assert_eq!(parameter.high, 32767);
        assert!(store.find_by_name(&name).is_some());
        store.add_synthesized(name, ValueType::U7);
        assert_eq!(store.parameters().count(), 1);
    }
}
