//! Durable state for the Planloom engine on embedded SQLite.
//!
//! The store is the single shared mutable resource of the engine. It applies
//! forward-only, file-ordered migrations at open time (recorded in a
//! `schema_migrations` meta table), enables foreign keys, and exposes
//! transactional CRUD per entity. The engine's run loop is the only writer;
//! external observers may read concurrently through their own connections.

mod migrations;
mod store;

pub use migrations::{expected_migrations, MigrationError};
pub use store::Store;
