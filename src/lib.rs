//! # Nixopus Control Plane Library
//!
//! Accounts, organizations, API keys, the CLI device login and container
//! operations behind one admission pipeline, plus the client library the
//! `nixopus` CLI uses to talk to it.

pub mod auth;
pub mod cli;
pub mod config;
pub mod containers;
pub mod crypto;
pub mod db;
pub mod device_grant;
pub mod error;
pub mod handlers;
pub mod http_client;
pub mod middleware;
pub mod models;
pub mod notifications;
pub mod repositories;
pub mod seeds;
pub mod server;
pub mod ssh;
pub mod telemetry;
pub use migration;
