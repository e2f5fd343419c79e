//! Shared types used across herald crates: backends, media payloads, batch
//! configuration and dispatch results.

pub mod types;

pub use types::{
    Backend, BatchConfig, BroadcastSummary, DispatchFailure, DispatchResult, MediaPayload,
    MessageKind, ReconcileReport,
};
