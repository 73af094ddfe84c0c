//! Sealya library
//!
//! Local persistence and state-reconciliation core of the Sealya letter
//! journal: letters, subscription limits, redundant identity storage with
//! snapshot recovery, and the day/night theme scheduler.

pub mod app;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod services;
pub mod storage;
