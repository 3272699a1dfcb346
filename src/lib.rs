//! ModemGuard library - GSM gateway health supervision
//!
//! This module exports internal components for integration testing.

pub mod cli;
pub mod config;
pub mod executor;
pub mod health;
pub mod inspect;
pub mod model;
pub mod orchestrator;
pub mod recovery;
pub mod recovery_log;
pub mod scheduler;
pub mod tracker;
pub mod tunnel;
