//! Assistant daemon: the long-running process behind the panel.

pub mod assistant;
pub mod client;
pub mod config;
pub mod paths;
pub mod server;
pub mod services;

// Public API - used by main.rs
pub use client::DaemonClient;
pub use server::DaemonServer;
