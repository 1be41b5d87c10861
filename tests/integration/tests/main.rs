//! End-to-End Integration Tests
//!
//! These tests drive complete queries against the in-memory directory
//! shipped behind the `test-util` feature, plus one opt-in test against a
//! live LDAPS server.

mod common;
mod live_directory;
mod paged_search;
mod resource_release;
