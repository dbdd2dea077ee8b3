//! # clinav - Interactive CLI Session Automation
//!
//! `clinav` drives interactive command-line sessions (shells, serial consoles,
//! proxies) the way a human operator would: it watches the output stream,
//! recognizes prompts, answers interactive questions, and moves the session
//! between shells along a declared state graph.
//!
//! ## Features
//!
//! - **Notification bus**: one connection fans its data out to many weakly held
//!   subscribers, with faulty subscribers isolated from the others
//! - **Incremental parsing**: observers see complete and partial lines, so a
//!   `Password:` prompt without a newline gets answered
//! - **State navigation**: shortest-path moves between prompts with interactive
//!   responses, ambiguity detection and per-hop deadlines
//! - **Self-test**: exhaustive, reproducibly shuffled traversal of all state pairs
//! - **Recording**: JSONL session recording and offline replay
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use clinav::cmd::{Ps, TextualCommand};
//! use clinav::config::DeviceConfig;
//! use clinav::manager::MANAGER;
//! use clinav::templates;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DeviceConfig::from_template("lab-host", "unix_local");
//!     let device = MANAGER
//!         .get_ssh(&config, "admin", "192.168.1.1", 22, "password")
//!         .await?;
//!
//!     device.goto_state(templates::UNIX_LOCAL_ROOT).await?;
//!
//!     let processes = TextualCommand::new(Ps::new("-ef"))
//!         .run(Arc::clone(device.connection()), None)
//!         .await?;
//!     println!("{} processes", processes.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`publisher::NotificationBus`] - fan-out of connection data
//! - [`observer::StreamObserver`] - line dispatch contract of commands and events
//! - [`device::DeviceStateGraph`] - states, edges and path finding
//! - [`navigator::Device`] - current state tracking and navigation
//! - [`selftest::iterate_over_device_states`] - exhaustive traversal
//! - [`manager::DeviceManager`] - cached device factory
//! - [`error::ConnectError`] - error types for navigation and transports

pub mod cmd;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod events;
pub mod fixture;
pub mod helpers;
pub mod manager;
pub mod navigator;
pub mod observer;
pub mod publisher;
pub mod recording;
pub mod selftest;
pub mod templates;

pub use error::{ConnectError, ObserverError};
pub use navigator::Device;
pub use observer::{LineContext, LineDispatch, LineHandler, StreamObserver};
pub use publisher::NotificationBus;
