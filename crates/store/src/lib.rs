//! Durable storage for user carts and orders.
//!
//! Both stores come in two flavours with identical semantics: an in-memory
//! implementation for tests and local runs, and a PostgreSQL implementation.

pub mod cart;
pub mod error;
pub mod memory;
pub mod order;
pub mod postgres;

pub use cart::{CartStore, UpsertMode};
pub use error::{Result, StoreError};
pub use memory::{InMemoryCartStore, InMemoryOrderStore};
pub use order::{OrderStore, StatusChange};
pub use postgres::{PostgresCartStore, PostgresOrderStore, run_migrations};
