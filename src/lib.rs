//! Wagate - Self-Hosted WhatsApp Gateway
//!
//! A small web application that sends and schedules outbound WhatsApp text
//! messages over the WhatsApp Web protocol (via `whatsapp-rust`), exposes
//! connection and QR-pairing status over a WebSocket channel, and persists
//! the paired session to disk.
//!
//! ## Features
//!
//! - **Send now or later:** immediate dispatch plus timezone-aware scheduling
//! - **QR pairing over the web:** pairing codes are pushed to every connected
//!   browser as they rotate
//! - **Self-supervising connection:** transient drops reconnect automatically;
//!   a remote logout purges the session and lets the supervisor restart clean
//! - **Local-first:** session state lives in a single SQLite file under the
//!   data directory
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with defaults (port 8080, data in ~/.wagate)
//! wagate
//!
//! # Custom port, verbose logs
//! wagate --port 3000 --debug
//! ```

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod scheduler;
pub mod server;

// Re-export commonly used types
pub use error::{Result, WagateError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
