#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod logging;
pub mod model;
pub mod number;
pub mod period;
pub mod pipeline;
pub mod publish;
pub mod release;
pub mod report;
pub mod rules;
pub mod store;
