//! LingoCast API Library Crate
//!
//! This library contains the HTTP surface of the lesson service: configuration,
//! the PostgreSQL store, API handlers, and routing. The binaries in `bin/` are
//! thin wrappers around it.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
