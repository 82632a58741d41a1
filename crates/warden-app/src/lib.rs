//! Warden - traffic-filtering gateway.
//!
//! The `warden` binary runs the Decision API and the intercepting proxy
//! over one rule database. This library half holds what the binary needs
//! beyond plain wiring.
//!
//! # Usage
//!
//! ```ignore
//! use std::path::Path;
//! use warden_app::config;
//!
//! let config = config::load(Path::new("warden.toml"))?;
//! println!("API on {}", config.api_addr()?);
//! ```

pub mod config;

pub use config::Config;
