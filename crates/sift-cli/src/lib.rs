//! Command-line interface and server binary for Sift.
//!
//! [`SiftApp`] loads a [`SiftConfig`], wires the index, ingest, access
//! and search services, and runs one [`cli::Command`]: serving the HTTP
//! API, rebuilding a space, running a search or managing the config file.

pub mod app;
pub mod cli;
pub mod config;
pub mod config_handlers;

pub use app::{Services, SiftApp};
pub use cli::{CliArgs, Command, ConfigAction, ConfigCommand};
pub use config::SiftConfig;
