#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc)]

pub mod agents;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod output;
pub mod sandbox;
pub mod workflow;
