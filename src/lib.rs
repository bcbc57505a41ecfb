//! Group chat moderation: flood control, warnings, keyword filters, notes
//! and welcome messages over a small durable key-value store.

pub mod bot;
pub mod commands;
pub mod config;
pub mod engine;
pub mod filters;
pub mod flood;
pub mod policy;
pub mod rules;
pub mod store;
pub mod transport;
pub mod warnings;
pub mod welcome;
