//! Price Tracker - marketplace listing and price history tracking
//!
//! Scraped search results are reconciled into per-variant listings; tracked
//! listings accumulate an append-only price history, refreshed by a
//! scheduled sweep over the user's search terms.

pub mod application;
pub mod domain;
pub mod infrastructure;
