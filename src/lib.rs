//! Discourse Moderation Bot library.
//!
//! A service that receives Discourse post webhooks, moderates new content,
//! flags duplicate topics and publishes discussion analyses once a topic has
//! grown enough.

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod analysis;
pub mod config;
pub mod constants;
pub mod discourse;
pub mod dispatcher;
pub mod duplicate;
pub mod llm;
pub mod moderation;
pub mod notify;
pub mod similarity;
pub mod summary;
pub mod text;
pub mod topics;
pub mod vector;
pub mod verdict;
pub mod web;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;
