//! Bicycle tracker firmware library.
//!
//! Exposes the bring-up and publishing logic for integration testing.
//! All ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module and falls back to a host simulation otherwise.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod error;
pub mod gate;
pub mod scheduler;
pub mod task;
pub mod telemetry;

pub mod adapters;
