//! Cached, minified HTML page serving.
//!
//! [`minify`] collapses whitespace in markup, [`cache`] stores rendered pages
//! in a fast and an optional durable tier, and [`infra`] wires both into an
//! axum server.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
pub mod minify;
