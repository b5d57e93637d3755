pub mod command;
pub mod decoder;
pub mod error;
pub mod framer;
pub mod guitar;
pub mod jamstik;
pub mod orchestrator;
pub mod queue;
pub mod rpn;
pub mod settings;
pub mod transport;
pub mod user_session;
