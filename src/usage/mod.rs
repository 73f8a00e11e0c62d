//! Subscription usage collaborator.
//!
//! Fetches account-level usage windows (separate from per-run token
//! summaries) from an external HTTP API, authenticating with a bearer token
//! read from the local credentials file.

mod client;
mod error;
mod types;

pub use client::UsageClient;
pub use error::{UsageError, UsageResult};
pub use types::{SubscriptionUsage, UsageWindow, normalize_windows};
