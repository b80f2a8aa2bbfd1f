//! SMS Shield - message history with spam classification
//!
//! A Rust library that ingests text messages from an external source, ties
//! each one to a contact, and classifies incoming messages as spam or safe.
//!
//! # Features
//!
//! - Idempotent, deduplicated message store with stable pagination
//! - Remote classification with a deterministic local fallback
//! - Durable retry queue for classifications deferred while offline
//! - Contact management with blocking and directory name sync

/// Remote classifier client
pub mod classifier;
/// Configuration management
pub mod config;
/// Network availability checks
pub mod connectivity;
/// Message store on a pooled SQLite database
pub mod db;
/// Contact directory adapters
pub mod directory;
/// Error types
pub mod error;
/// Local spam scoring
pub mod heuristic;
/// Bulk and live ingestion
pub mod ingest;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Event notifications
pub mod notify;
/// Classification state machine
pub mod pipeline;
/// Durable retry queue
pub mod retry_queue;
/// Database schema definitions
pub mod schema;
/// Outbound message transport
pub mod sender;
/// Service facade
pub mod service;
/// External message source adapters
pub mod source;
/// Input validation and sanitization
pub mod validation;

// Re-export key components for easier access
pub use db::Database;
pub use error::{Result, ShieldError};
pub use models::{Contact, Direction, Message, MessageStatus, SourceRecord, TrustStatus};
pub use pipeline::{ClassificationPipeline, ClassifyOutcome};
pub use retry_queue::RetryQueue;
pub use service::ShieldService;
