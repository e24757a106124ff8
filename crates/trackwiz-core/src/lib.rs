//! trackwiz-core: session wizard for a remote video object tracking service
//!
//! Drives a five-step workflow against the tracking service: upload a video,
//! extract frames, select points on a preview frame, run tracking, collect
//! the results.
//!
//! # Architecture
//!
//! ```text
//! Presentation (CLI) ──ops──▶ WizardController ──requests──▶ TrackingService
//!        ▲                      │        ▲                     (HTTP / fake)
//!        └──── WizardEvent ─────┘        └── PollEvent ── Poller (tokio task)
//! ```
//!
//! # Modules
//!
//! - `wizard`: step state machine, no I/O
//! - `points`: annotation point collection
//! - `controller`: binds the wizard to a service and the poller
//! - `poll`: status poll loop with generation tagging and bounds
//! - `service`: service contract and wire types
//! - `client`: reqwest implementation of the service contract
//! - `fake`: scripted in-memory service
//! - `view`: view models for front ends
//! - `config`: `trackwiz.toml` loading
//! - `logging`: tracing subscriber setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod fake;
pub mod logging;
pub mod points;
pub mod poll;
pub mod service;
pub mod view;
pub mod wizard;

pub use controller::{ControllerOptions, WizardController, WizardEvent};
pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
