//! Job execution engine for conveyor.
//!
//! A job process decodes one [`JobSpec`](conveyor_types::spec::JobSpec),
//! hands it to [`runner::run_job`], and exits with the code of the
//! returned [`JobOutcome`](runner::JobOutcome). Everything a job touches
//! lives here:
//!
//! - [`codec`] / [`artifacts`]: typed artifact payloads and their storage I/O
//! - [`package`]: building and unpacking function archives
//! - [`function`]: running a packaged function in an isolated process
//! - [`connector`]: Postgres-family, `SQLite` and S3 connectors
//! - [`dag`]: rendering a workflow as an Airflow DAG file
//! - [`config`]: runtime configuration threaded through every job

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod artifacts;
pub mod codec;
pub mod config;
pub mod connector;
pub mod dag;
pub mod errors;
pub mod function;
pub mod package;
pub mod runner;

pub use config::RuntimeConfig;
pub use errors::JobError;
pub use runner::{record_failure, run_job, run_job_with_storage, JobOutcome};
