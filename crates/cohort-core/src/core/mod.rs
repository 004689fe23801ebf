//! Core module: UI-agnostic conversation domain and runtime.
//!
//! This module contains:
//! - `conversation`: Messages, agent instances and live conversation state
//! - `registry`: Per-message agent instance registry
//! - `reducer`: Applies decoded server events to the conversation
//! - `approval`: Human-in-the-loop checkpoint state and decisions
//! - `controller`: Drives one turn against the backend
//! - `events`: Updates published to observers during a turn
//! - `interrupt`: Signal handling for graceful interruption

pub mod approval;
pub mod controller;
pub mod conversation;
pub mod events;
pub mod interrupt;
pub mod reducer;
pub mod registry;
