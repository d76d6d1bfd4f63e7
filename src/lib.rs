//! pagevault - personal file and bookmark vault.
//!
//! Bookmarks are archived into self-contained offline snapshots (rewritten
//! HTML, favicon and referenced assets) that can be served back without ever
//! touching the network again.

pub mod config;
pub mod fetch;
pub mod filename;
pub mod models;
pub mod repository;
pub mod rewriter;
pub mod schema;
pub mod server;
pub mod services;
