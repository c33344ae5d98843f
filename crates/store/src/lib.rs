//! Persistence boundary for the storefront core.
//!
//! The domain engines depend only on the narrow per-entity traits defined in
//! [`traits`]; they never see a query language. Two backends are provided:
//! [`MemoryStore`] (thread-safe, used by every test) and [`PostgresStore`]
//! (sqlx, schema under `migrations/`).

pub mod error;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use traits::{CartStore, CategoryStore, OrderStore, ProductStore, UserStore};
