//! bdr-platform
//!
//! HTTP client for the publishing platform: publishes (the remote
//! transactions grouping layer versions) and layer version operations.
//! The orchestrator and verifier depend only on the [`PlatformApi`] trait.

mod client;
mod types;

pub use client::{PlatformApi, PlatformClient, ENV_API_TOKEN};
pub use types::{
    ChangeSummary, Layer, LayerVersion, PlatformError, Publish, PublishDraft, PublishItem,
    PublishState,
};
