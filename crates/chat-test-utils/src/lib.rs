//! Test utilities for the Parley Chat Controller.
//!
//! Provides in-memory mock implementations of the controller's storage
//! and search seams:
//!
//! - [`MockMessageStore`]: in-memory `MessageStore` with monotonic IDs
//! - [`MockSearchIndex`]: in-memory `SearchIndex` with injectable failures

pub mod mock_index;
pub mod mock_store;

pub use mock_index::MockSearchIndex;
pub use mock_store::MockMessageStore;
