use async_trait::async_trait;
use common::UserId;
use domain::{Cart, LineItem, LineKey};

use crate::Result;

/// How an upserted line combines with an existing line for the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertMode {
    /// Add the incoming quantity to the stored one.
    Increment,
    /// Overwrite the stored quantity.
    Replace,
}

/// Durable store for user carts.
///
/// Only registered users have durable carts; guest carts live in the cache
/// layer. Every method is a single atomic write: a concurrent reader sees
/// either the state before or after it, never a partial cart.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Loads a user's cart. Returns None if the user has never had one.
    async fn load(&self, user_id: UserId) -> Result<Option<Cart>>;

    /// Replaces the whole cart with `lines` (delete-all-then-insert in one
    /// transaction) and returns the stored cart.
    async fn replace_all(&self, user_id: UserId, lines: &[LineItem]) -> Result<Cart>;

    /// Folds `guest` lines into the user's stored lines with
    /// [`domain::merge_lines`] and stores the result.
    ///
    /// The read, merge and write happen under the cart's write lock, so a
    /// mutation racing with the merge lands either before or after it.
    async fn merge_guest_lines(&self, user_id: UserId, guest: &[LineItem]) -> Result<Cart>;

    /// Inserts or updates one line, creating the cart if needed.
    ///
    /// Price and display metadata always come from `line`; the quantity is
    /// combined according to `mode`. Returns the stored line.
    async fn upsert_line(
        &self,
        user_id: UserId,
        line: &LineItem,
        mode: UpsertMode,
    ) -> Result<LineItem>;

    /// Removes one line. Returns false if the line did not exist.
    async fn remove_line(&self, user_id: UserId, key: &LineKey) -> Result<bool>;

    /// Removes every line from the cart.
    async fn clear(&self, user_id: UserId) -> Result<()>;
}
