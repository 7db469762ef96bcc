#![forbid(unsafe_code)]

pub mod context;
pub mod engine;
pub mod request;
pub mod steps;
pub mod task;
