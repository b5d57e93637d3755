use std::fmt;

use crate::{
    jamstik::{packed::CodecError, schema::SchemaError},
    queue::QueueError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorType {
    TransportError,
    FramingError,
    SchemaError,
    CodecError,
    ModelError,
    QueueFull,
    ConfigError,
    RuntimeError,
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub error_type: ErrorType,
    pub message: String,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}; {}", self.error_type, self.message)
    }
}

impl std::error::Error for AppError {}

impl AppError {
    pub fn new(error_type: ErrorType, message: String) -> Self {
        Self {
            error_type,
            message,
        }
    }

    pub fn runtime(message: &str) -> Self {
        Self {
            error_type: ErrorType::RuntimeError,
            message: message.to_string(),
        }
    }

    pub fn transport(message: &str) -> Self {
        Self {
            error_type: ErrorType::TransportError,
            message: message.to_string(),
        }
    }

    pub fn config(message: &str) -> Self {
        Self {
            error_type: ErrorType::ConfigError,
            message: message.to_string(),
        }
    }
}

impl From<CodecError> for AppError {
    fn from(error: CodecError) -> Self {
        AppError::new(ErrorType::CodecError, error.to_string())
    }
}

impl From<SchemaError> for AppError {
    fn from(error: SchemaError) -> Self {
        AppError::new(ErrorType::SchemaError, error.to_string())
    }
}

impl From<QueueError> for AppError {
    fn from(error: QueueError) -> Self {
        let error_type = match error {
            QueueError::Full => ErrorType::QueueFull,
            QueueError::TooLarge(_) => ErrorType::FramingError,
        };
        AppError::new(error_type, error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        AppError::new(ErrorType::RuntimeError, error.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(error: serde_yaml::Error) -> Self {
        AppError::new(ErrorType::ConfigError, error.to_string())
    }
}

impl From<regex::Error> for AppError {
    fn from(error: regex::Error) -> Self {
        AppError::new(ErrorType::ConfigError, error.to_string())
    }
}
