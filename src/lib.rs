// src/lib.rs

//! Incheon airport cargo schedule watcher.
//!
//! Fetches the published cargo schedule for one counterpart airport, keeps
//! the last snapshot per direction and reports new flights and time changes
//! to a Discord webhook.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

pub use error::{AppError, Result};
