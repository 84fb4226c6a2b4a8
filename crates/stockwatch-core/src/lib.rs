//! Core types and engines for the stockwatch product tracker.
//!
//! This crate is deliberately free of HTTP and database dependencies. The
//! network and the persisted key-value store are reached through the
//! [`fetch::Fetcher`] and [`store::KvStore`] traits; concrete implementations
//! live in `stockwatch-store-sqlite` and `stockwatch-cli`.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod checker;
pub mod classify;
pub mod error;
pub mod events;
pub mod fetch;
pub mod history;
pub mod policy;
pub mod product;
pub mod report;
pub mod scheduler;
pub mod settings;
pub mod store;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
