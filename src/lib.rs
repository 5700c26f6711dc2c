//! Forum file relay library.
//!
//! Watches a forum listing page, extracts newly published file attachments
//! from its threads, and delivers each one exactly once to a Telegram channel.
//! Delivery history, failures and daily counters are kept in SQLite.

#![allow(clippy::needless_raw_string_hashes)]

pub mod admin;
pub mod config;
pub mod constants;
pub mod crawl;
pub mod db;
pub mod dedup;
pub mod relay;
pub mod settings;
pub mod sink;
pub mod web;
