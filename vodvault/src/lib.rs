//! vodvault library crate.
//!
//! Archive pipeline for live streams and VODs: the task chain, live video
//! and chat capture, heartbeat and watchdog. Exposed for the binary and for
//! integration testing.

pub mod config;
pub mod database;
pub mod downloader;
pub mod error;
pub mod jobs;
pub mod live;
pub mod logging;
pub mod notification;
pub mod panic_hook;
pub mod platform;
pub mod tasks;
pub mod toolchain;
pub mod utils;

pub use error::{Error, Result};
