//! # Xhare Core Library
//!
//! `xhare-core` coordinates file-transfer sessions for Xhare, a peer-to-peer
//! local network file sharing app. Moving bytes and finding peers is the job
//! of an external transfer engine; this crate owns the sessions the user
//! sees and keeps them consistent.
//!
//! ## Features
//!
//! - **One session per direction**: at most one outgoing and one incoming
//!   transfer at a time
//! - **Stale-event safe**: events for other or dismissed transfers never
//!   touch the live session
//! - **Single writer**: commands and engine events are serialised through one
//!   tokio task
//! - **Host agnostic**: notifications and engine calls go through traits
//!
//! ## Modules
//!
//! - [`config`] - Configuration management
//! - [`coordinator`] - The transfer session state machine and its service loop
//! - [`device`] - Reachable peers and the device registry
//! - [`gateway`] - Transfer engine commands and events
//! - [`history`] - Transfer history tracking and persistence
//! - [`notify`] - User-facing notifications
//! - [`session`] - Session value types and the session model
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use xhare_core::{Config, Coordinator, CoordinatorService, DeviceRegistry, TracingSink};
//!
//! let coordinator = Coordinator::new(engine, Arc::new(TracingSink), Config::load()?);
//! let (handle, _task) = CoordinatorService::spawn(coordinator, Arc::new(DeviceRegistry::new()));
//!
//! handle.select_device_by_ip("192.168.1.20").await?;
//! handle.select_file(Some(LocalFile::from_path("report.pdf", 52_000))).await?;
//! handle.send().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod gateway;
pub mod history;
pub mod notify;
pub mod session;

pub use config::{Config, OfferPolicy};
pub use coordinator::service::{CoordinatorHandle, CoordinatorService};
pub use coordinator::Coordinator;
pub use device::{Device, DeviceRegistry};
pub use error::{Error, Result};
pub use gateway::{BackendEvent, CommandGateway, EventBridge, EventStream, TransferId};
pub use history::{HistoryStore, TransferHistoryEntry};
pub use notify::{ChannelSink, Notification, NotificationLevel, NotificationSink, TracingSink};
pub use session::{
    IncomingRequest, IncomingStatus, IncomingTransfer, LocalFile, OutgoingStatus,
    OutgoingTransfer, SessionSnapshot,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default device registry refresh interval in seconds
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 2;
