//! # sidecar-core
//!
//! Core types, errors, and utilities shared by every sidecar controller crate.
//!
//! - [`PodKey`] names a pod (`namespace/name`) and is the work queue's dedup key.
//! - [`PodSnapshot`] is the read-only view of a pod the reconciler evaluates.
//! - [`ContainerSet`] is the typed set of container names the shutdown
//!   decision is expressed in.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod result;
pub mod types;

pub use error::Error;
pub use result::{Result, ResultExt};
pub use types::{ContainerSet, ContainerState, ContainerStatus, PodKey, PodSnapshot};
