//! jira-bridge - Bidirectional sync between a production management site and Jira
//!
//! Change events from either system are routed through a [`Bridge`] to the
//! syncer of a named channel, which filters them, resolves the counterpart
//! through the cross reference stored on both sides, and writes the minimal
//! set of field changes. All state lives in the two systems of record.
//!
//! # Architecture
//!
//! - **bridge**: Channel routing, clients and bridge identities
//! - **syncer**: Event acceptance and per-channel orchestration
//! - **translator**: Value mapping and issue creation data
//! - **reconciler**: Multi-valued field merging (assignees)
//! - **channel**: Channel field tables
//! - **event**: Inbound event payloads
//! - **integrations**: Client traits and adapters (REST, in-memory)
//! - **config**: Settings loading and validation

// Core modules
pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;

// Components
pub mod bridge;
pub mod integrations;
pub mod reconciler;
pub mod syncer;
pub mod translator;

// Re-exports
pub use bridge::Bridge;
pub use error::{BridgeError, Result};
