//! Core library for cardqueue — domain model, persistence, configuration,
//! and the daemon singleton lockfile.

pub mod config;
pub mod error;
pub mod lockfile;
pub mod settings;
pub mod store;
pub mod types;
