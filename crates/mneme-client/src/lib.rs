//! Mneme Client - HTTP client for the remote timeline service
//!
//! This crate provides [`TimelineApiClient`], a `reqwest`-based implementation
//! of [`mneme_core::TimelineClient`] for Twitter v1.1-compatible REST APIs.
//!
//! # Overview
//!
//! The client handles bearer authentication, request building, response
//! parsing, rate-limit waiting and error classification.

pub mod api;

// Re-export main client types
pub use api::TimelineApiClient;
