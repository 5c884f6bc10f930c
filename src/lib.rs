//! Mind-Chat core: per-mode conversation history and a single-consumer
//! generation scheduler over a local inference backend.
//!
//! The crate exposes four layers, leaves first:
//! - [`history`]: bounded, favorite-aware conversation store plus the
//!   pluggable persistence port.
//! - [`generation`]: the inference backend boundary, prompt assembly, and
//!   the FIFO scheduler that serializes and cancels backend calls.
//! - [`service`]: the orchestration surface a control layer talks to.
//! - [`bootstrap`]: wiring helpers for the chat console binary.

// Interdiction stricte de pratiques dangereuses ou non idiomatiques
#![deny(unsafe_code)] // Le code unsafe est interdit
#![deny(missing_docs)] // Toute API publique doit être documentée
#![forbid(unsafe_op_in_unsafe_fn)]
// Clippy pour stricte discipline
#![deny(clippy::all)]
#![deny(clippy::unwrap_used)] // Interdit unwrap() en production
#![deny(clippy::expect_used)] // Interdit expect() en production
#![deny(clippy::panic)] // Interdit panic!() en production
#![deny(clippy::print_stdout)] // Interdit println!() hors du binaire
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

/// Startup helpers for the chat console binary.
pub mod bootstrap;
/// Application configuration shared across the Mind-Chat core.
pub mod config;
/// Error types for the Mind-Chat core.
pub mod errors;
/// Generation: backend boundary, prompt assembly, and the scheduler.
pub mod generation;
/// Conversation history: data model, bounded repository, persistence port.
pub mod history;
/// Identifier types for conversations and generation requests.
pub mod ids;
/// Control-layer orchestration surface.
pub mod service;
