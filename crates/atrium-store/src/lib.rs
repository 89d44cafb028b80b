//! # Atrium Store
//!
//! Durable state owned by the plugin runtime:
//! - Plugin registry (installed / active flags, last applied config)
//! - Applied migration bookkeeping
//! - Declared plugin permissions
//!
//! ## Backends
//!
//! - **InMemory**: single process, nothing persisted (tests, development)
//! - **SQLite**: durable, backed by a `sqlx` pool
//!
//! ## Example
//!
//! ```rust
//! use atrium_store::{InMemoryStore, PluginStore, RegistryRecord};
//!
//! #[tokio::main]
//! async fn main() -> atrium_store::Result<()> {
//!     let store = InMemoryStore::new();
//!     store.ensure_schema().await?;
//!
//!     let mut record = RegistryRecord::new("hello-world");
//!     record.is_installed = true;
//!     store.upsert_record(&record).await?;
//!
//!     assert!(store.get_record("hello-world").await?.is_some());
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

mod error;
mod store;

#[cfg(feature = "inmemory")]
mod inmemory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use error::{Error, Result};
pub use store::{MigrationRecord, PermissionRecord, PluginStore, RegistryRecord};

#[cfg(feature = "inmemory")]
pub use inmemory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::store::{MigrationRecord, PermissionRecord, PluginStore, RegistryRecord};

    #[cfg(feature = "inmemory")]
    pub use crate::inmemory::InMemoryStore;

    #[cfg(feature = "sqlite")]
    pub use crate::sqlite::SqliteStore;
}
