//! # Terrareg
//!
//! A private registry for Terraform modules and providers, usable both as a
//! standalone binary and as a library.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! terrareg = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use terrareg::config::ServerConfig;
//! use terrareg::server::{AppState, create_router};
//! use terrareg::store::{SqliteStore, Store};
//!
//! let config = ServerConfig::load(None)?;
//! let store = SqliteStore::open(&config.database_location()?)?;
//! store.initialize()?;
//! let blobs = terrareg::storage::connect(&config).await?;
//!
//! let state = Arc::new(AppState::new(Arc::new(store), blobs, config));
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): builds the `terrareg` binary.
//! - `s3` (default): S3-compatible blob storage.

pub mod analytics;
pub mod auth;
pub mod config;
pub mod error;
pub mod module;
pub mod server;
pub mod storage;
pub mod store;
pub mod types;
pub mod webhook;
