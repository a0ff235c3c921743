// SPDX-FileCopyrightText: 2026 Hoprelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the hoprelay message relay.
//!
//! Provides WAL-mode SQLite storage with embedded migrations, a single-writer
//! connection via `tokio-rusqlite`, typed queries for identities, pairs,
//! worker groups, and health samples, and the [`SqliteMappingStore`].

pub mod database;
pub mod mapping_store;
pub mod migrations;
pub mod models;
pub mod queries;

pub use database::Database;
pub use mapping_store::SqliteMappingStore;
pub use models::*;
