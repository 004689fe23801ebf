//! Core cohort library (stream decoding, conversation state, sessions).

pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod history;
pub mod logging;
pub mod stream;
pub mod upload;
