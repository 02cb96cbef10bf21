//! # stagekeep
//!
//! Command line access to provisioning stage state kept by stagekeep-core.
//!
//! The binary in `main.rs` is a thin wrapper; commands and configuration live
//! here so they can be driven from tests.

pub mod cli;
pub mod config;
