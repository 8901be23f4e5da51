//! Common types and utilities shared by the arbiter and the devices it talks to.
//!
//! This crate provides:
//! - Field-list message serialization and parsing ([`message`])
//! - Message kinds and port conventions ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod message;
pub mod types;

pub use message::{Message, MessageError};
