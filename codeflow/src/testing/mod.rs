//! Testing utilities for codeflow.
//!
//! This module provides:
//! - A manually advanced clock for convergence polling
//! - An in-memory control plane that records calls
//! - Template archive, compiled unit and serialized closure fixtures

mod clock;
mod control_plane;
pub mod fixtures;

pub use clock::ManualClock;
pub use control_plane::{ControlPlaneCall, InMemoryControlPlane, Upload};
