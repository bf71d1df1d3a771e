//! `ctidashy` - An internal dashboard for CTI analysts
//!
//! This library provides the panels behind the dashboard: manifest
//! comparison and resends, folder and duplicate reports, OpenCTI search and
//! account tooling, and the axum server that exposes them as JSON.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod dupes;
pub mod error;
pub mod folders;
pub mod fsutil;
pub mod logging;
pub mod manifest;
pub mod opencti;
pub mod presets;
pub mod resend;
pub mod tor;
pub mod users;
pub mod watchlist;
pub mod web;

pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use users::{Panel, UserStore};
pub use web::{router, AppState};
