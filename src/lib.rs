#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod cli;
pub mod config;
mod core;
mod error;
mod io;
pub mod logging;
mod orchestrator;
pub mod pipeline;
pub mod reload;
#[cfg(feature = "server")]
pub mod server;
pub mod stage;
mod task;
pub mod theme;
#[cfg(feature = "live")]
pub mod watch;

pub use crate::config::{Config, Program};
pub use crate::error::*;
pub use crate::io::{as_overhead, clear_dir, write_if_changed};
pub use crate::orchestrator::{Context, Orchestrator, Shutdown};
pub use crate::pipeline::{FailurePolicy, Pipeline, PipelineReport, Stage};
pub use crate::task::{
    Composition, Registry, Report, TaskRef, TaskState, compose, parallel, series,
};
