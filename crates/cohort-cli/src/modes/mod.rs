//! Runtime execution modes.
//!
//! - `chat`: Streamed stdout/stderr rendering of one turn

pub mod chat;
