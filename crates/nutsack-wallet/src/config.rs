//! Session configuration.

use crate::select::{SelectionOptions, SelectionStrategy};
use std::time::Duration;

/// Tunables for a wallet session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Result cap per relay query.
    pub query_limit: usize,
    /// Older pages fetched per kind when a query hits `query_limit`.
    pub max_pages: usize,
    /// Delay between mint quote checks.
    pub poll_interval: Duration,
    pub selection: SelectionStrategy,
    pub max_inputs: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            query_limit: 100,
            max_pages: 10,
            poll_interval: Duration::from_secs(5),
            selection: SelectionStrategy::Default,
            max_inputs: 64,
        }
    }
}

impl SessionConfig {
    pub fn selection_options(&self) -> SelectionOptions {
        SelectionOptions {
            strategy: self.selection,
            max_inputs: self.max_inputs,
        }
    }
}
