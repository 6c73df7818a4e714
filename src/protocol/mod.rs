//! FSCP wire protocol: message model, line framing, stdio tasks, spawning.

pub mod codec;
pub mod message;
pub mod reader;
pub mod spawner;
pub mod stderr_tail;
pub mod writer;

pub use message::{LogLevel, Message, MessageKind};
