//! MCP Guardian: a validating reverse proxy for Model Context Protocol
//! servers. See each module for the component of the design it implements.

pub mod admin;
pub mod canonical;
pub mod config;
pub mod diff;
pub mod error;
pub mod model;
pub mod proxy;
pub mod registry;
pub mod repository;
pub mod scheduler;
pub mod snapshot;
pub mod upstream;

pub use error::{GuardianError, GuardianResult};
