//! Guest-to-user cart reconciliation at login.

use common::{GuestToken, OwnerKey, UserId};
use domain::Cart;
pub use domain::merge_lines;

use crate::error::Result;
use crate::service::{CartService, record_cache_error};

/// Merges a guest cart into a user cart.
///
/// Lines present in both carts have their quantities summed; price and
/// display metadata come from whichever copy was refreshed more recently,
/// with ties going to the user's copy. The store folds the guest lines in
/// under the user cart's lock, so concurrent writes to the user cart are kept.
#[derive(Clone)]
pub struct CartReconciler {
    carts: CartService,
}

impl CartReconciler {
    /// Creates a reconciler sharing the cart service's store and cache.
    pub fn new(carts: CartService) -> Self {
        Self { carts }
    }

    /// Merges the guest's cart into the user's durable cart.
    ///
    /// If the guest cart cannot be read, or is empty, nothing is written and
    /// the user's existing cart is returned. If the durable write fails the
    /// whole merge fails and the guest cart is left in place.
    #[tracing::instrument(skip(self, guest), fields(guest = %guest, user = %user))]
    pub async fn merge(&self, guest: &GuestToken, user: UserId) -> Result<Cart> {
        let guest_owner = OwnerKey::Guest(guest.clone());
        let user_owner = OwnerKey::user(user);
        let _guest = self.carts.lock_guest(&guest_owner).await;

        let guest_cart = match self.carts.cache().get(&guest_owner).await {
            Ok(cart) => cart,
            Err(e) => {
                record_cache_error("get", &guest_owner, &e);
                None
            }
        };

        let Some(guest_cart) = guest_cart.filter(|c| !c.is_empty()) else {
            tracing::debug!("no guest lines to merge");
            return self.carts.load_durable(user).await;
        };

        let cart = self
            .carts
            .store()
            .merge_guest_lines(user, &guest_cart.into_lines())
            .await?;

        self.carts.invalidate(&user_owner).await;
        if let Err(e) = self.carts.cache().remove(&guest_owner).await {
            record_cache_error("remove", &guest_owner, &e);
        }

        metrics::counter!("cart_merges_total").increment(1);
        tracing::info!(lines = cart.len(), "guest cart merged");
        Ok(cart)
    }
}
