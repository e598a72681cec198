//! Clients for the external services the pipeline drives.
//!
//! - [`ContentClient`]: per-stage generation endpoints and the durable job
//!   record (job lookup, captions, completion, failure)
//! - [`RenderFarmClient`]: cloud render submission and status polling

pub mod client;
pub mod error;
pub mod render;
pub mod types;

pub use client::{ContentClient, ServiceConfig};
pub use error::{ServiceError, ServiceResult};
pub use render::RenderFarmClient;
pub use types::{RenderJobStatus, RenderRequest, RenderState, RenderSubmission};
