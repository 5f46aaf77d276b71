//! Integration tests for eload-ingest.
//!
//! Each scenario drives the orchestrator end to end against a temporary
//! directory, with the workflow engine and helper tools replaced by fakes.
//! Run: cargo test --test integration

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;
mod planning;
mod recovery;
mod resume;
