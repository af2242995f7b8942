//! Mneme Store - durable storage for harvest runs.
//!
//! # Overview
//!
//! The main components are:
//! - [`LedgerRepository`] - SQLite-backed [`LedgerStore`](mneme_core::LedgerStore)
//!   holding one progress entry per identity
//! - [`JsonlSink`] - append-only JSON Lines [`ItemSink`](mneme_core::ItemSink)

mod jsonl_sink;
mod ledger_repository;

pub use jsonl_sink::JsonlSink;
pub use ledger_repository::LedgerRepository;
