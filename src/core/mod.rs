#![forbid(unsafe_code)]

pub mod analysis;
pub mod complexity;
pub mod git;
pub mod github;
pub mod messages;
pub mod naming;
