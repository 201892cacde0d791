#![forbid(unsafe_code)]

//! Public entry point for the vodhot crate.
//!
//! The interesting part is [`hotness`], a score-accumulating leaderboard fed
//! by engagement events. The other modules are the plumbing the backend
//! binary needs around it: configuration, metadata persistence and the HTTP
//! routes that turn user actions into ledger events.

pub mod api;
pub mod config;
pub mod hotness;
pub mod metadata;
