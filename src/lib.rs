//! Tether Library
//!
//! Core components for the AI CLI run orchestration and streaming relay server:
//! command construction, process execution, NDJSON stream parsing, file-tail
//! relaying, and the HTTP layer that ties them together.

pub mod api;
pub mod cache;
pub mod config;
pub mod events;
pub mod exec;
pub mod relay;
pub mod run;
pub mod usage;
pub mod workspace;
