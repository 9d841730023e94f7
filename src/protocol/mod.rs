//! Protocol Module
//!
//! Wire-level pieces for both surfaces:
//!
//! - `types`: RESP reply values and their serialization
//! - `frame`: streaming reader for RESP multi-bulk / inline commands
//! - `text`: tokenizer and typed commands for the memcached line protocol

pub mod frame;
pub mod text;
pub mod types;

// Re-export commonly used types for convenience
pub use frame::read_command;
pub use text::{tokenize, TextCommand, TextError};
pub use types::RespValue;
