//! Magnet Relay Core Library
//!
//! This library gates, resolves, fetches and publishes content submitted as
//! magnet locators by chat users. Every fetch is admitted against a
//! per-identity quota, resolved cache-first to a file manifest, driven to a
//! single terminal outcome, and published to a shared channel at most once.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`admission`] - Quota and concurrency gate evaluated before any task
//! - [`registry`] - Keyed cancellation handles for running tasks
//! - [`resolution`] - Cache-first locator to manifest resolution
//! - [`session`] - Download session engine and deadline policy
//! - [`ledger`] - Publish deduplication (announce once, comment once)
//! - [`orchestrator`] - End-to-end fetch flow for request handlers
//! - [`locator`], [`manifest`], [`quota`] - Domain types
//! - [`engine`], [`transport`] - Seams to the transfer engine and chat platform
//! - [`db`], [`store`] - `SQLite` persistence
//! - [`config`], [`report`] - Settings and progress rendering

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod admission;
pub mod config;
pub mod db;
pub mod engine;
pub mod ledger;
pub mod locator;
pub mod manifest;
pub mod orchestrator;
pub mod quota;
pub mod registry;
pub mod report;
pub mod resolution;
pub mod session;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use admission::{Admission, AdmissionController, AdmissionError, AdmissionTicket};
pub use config::{ConfigError, LoadedSettings, Settings, load_settings};
pub use db::{Database, DatabaseOptions, DbError};
pub use engine::{EngineError, TransferEngine, TransferHandle};
pub use ledger::{CommentOutcome, LedgerSettings, PublishError, PublishLedger};
pub use locator::{Locator, LocatorError, ResourceId, extract_locator};
pub use manifest::{FileSelector, ResourceManifest, Selection, SelectorError, UnsafePath};
pub use orchestrator::{FetchError, FetchOrchestrator, FetchReport, FetchRequest};
pub use quota::{Identity, QuotaProfile, Tier, TierTable};
pub use registry::{TaskKey, TaskRegistry};
pub use report::{Progress, StatusReporter};
pub use resolution::{ResolutionError, Resolver};
pub use session::{DeadlinePolicy, SessionEngine, SessionError, SessionOutcome};
pub use store::{Store, StoreError, StoreErrorKind};
pub use transport::{ChatId, ChatTransport, MessageId, TransportError};
