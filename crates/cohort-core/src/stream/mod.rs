//! Server event stream: wire types and the byte-level decoder.

mod decoder;
pub mod events;

pub use decoder::EventDecoder;
pub use events::{AgentInfo, ServerEvent};
