//! Remote deployment.
//!
//! This module provides:
//! - The [`ControlPlane`] transport seam and its HTTP implementation
//! - Convergence polling with an injectable clock
//! - [`DeploymentClient`], the idempotent operations built on top

mod client;
mod control_plane;
#[cfg(feature = "http")]
mod http;
mod poll;

pub use client::DeploymentClient;
pub use control_plane::{ControlPlane, ModuleInfo, PipelineInfo, DEPLOYED_STATUS};
#[cfg(feature = "http")]
pub use http::HttpControlPlane;
pub use poll::{poll_until, Clock, PollPolicy, SystemClock};
