//! Database layer for trackline
//!
//! This module provides the durable event queue using SQLite with:
//! - Schema migrations
//! - The event record store (`add`, `all`, `update`, `remove`, `clear`)
//! - A small settings table for identity that must survive restarts

pub mod repo;
pub mod schema;

pub use repo::Database;
