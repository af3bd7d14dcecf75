//! Outbox Service
//!
//! The server side of outgoing registration and its command-line entry
//! points.
//!
//! # Components
//!
//! - [`RegistrationService`]: allocate-and-prepare, commit, journal queries
//! - [`http::router`]: the JSON API over the service
//! - [`ProjectBoard`]: cards, executors and template files
//! - [`OutboxClient`] / [`LocalGateway`]: ledger gateways for the signing orchestrator
//! - [`ServiceConfig`]: TOML configuration with `OUTBOX_*` overrides

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod board;
pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod registration;
pub mod telemetry;

pub use board::{BoardTemplateSource, Card, CardFile, CardMember, HttpBoard, MemoryBoard, ProjectBoard};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::ServiceConfig;
pub use error::ServiceError;
pub use gateway::{LocalGateway, OutboxClient};
pub use registration::{PrepareRequest, Registration, RegistrationService};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
