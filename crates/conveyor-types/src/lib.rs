//! Shared types for the conveyor job runtime.
//!
//! Everything a job process and its control plane agree on lives here:
//! the [`spec::JobSpec`] union, storage selection, artifact kinds, the
//! per-job [`result::OperatorResult`], the structured
//! [`error::ConnectorError`] and the function archive contract.
//! This crate performs no I/O.

#![warn(clippy::pedantic)]

pub mod artifact;
pub mod connector;
pub mod error;
pub mod function;
pub mod result;
pub mod spec;
pub mod storage;
