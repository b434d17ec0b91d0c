//! The cart value type.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{Money, OwnerKey, ProductId, VariantId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::line_item::{LineItem, LineKey};

/// The full set of line items for exactly one identity.
///
/// Lines keep insertion order. Two lines with the same [`LineKey`] never
/// coexist; adding an existing key folds into the existing line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    owner_key: OwnerKey,
    lines: Vec<LineItem>,
    last_synced_at: DateTime<Utc>,
    schema_version: String,
}

/// Compact per-line record attached to payment intents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "p")]
    pub product_id: ProductId,
    #[serde(rename = "v", skip_serializing_if = "Option::is_none", default)]
    pub variant_id: Option<VariantId>,
    #[serde(rename = "q")]
    pub quantity: u32,
    pub price: Money,
}

impl Cart {
    /// Schema version written with every cart snapshot.
    pub const SCHEMA_VERSION: &'static str = "1";

    /// Creates an empty cart for an owner.
    pub fn new(owner_key: OwnerKey) -> Self {
        Self {
            owner_key,
            lines: Vec::new(),
            last_synced_at: Utc::now(),
            schema_version: Self::SCHEMA_VERSION.to_string(),
        }
    }

    /// Builds a cart from stored lines, folding duplicate keys together.
    pub fn from_lines(
        owner_key: OwnerKey,
        lines: impl IntoIterator<Item = LineItem>,
        last_synced_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let mut cart = Self {
            owner_key,
            lines: Vec::new(),
            last_synced_at,
            schema_version: Self::SCHEMA_VERSION.to_string(),
        };
        for line in lines {
            cart.add_line(line)?;
        }
        Ok(cart)
    }

    /// Returns the owner of this cart.
    pub fn owner_key(&self) -> &OwnerKey {
        &self.owner_key
    }

    /// Returns the lines in insertion order.
    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    /// Consumes the cart, returning its lines.
    pub fn into_lines(self) -> Vec<LineItem> {
        self.lines
    }

    /// Returns the line for a key.
    pub fn line(&self, key: &LineKey) -> Option<&LineItem> {
        self.lines.iter().find(|l| l.product_id == key.product_id && l.variant_id == key.variant_id)
    }

    /// Returns true if the cart has no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Returns the number of distinct lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns the sum of all quantities, saturating at `u32::MAX`.
    pub fn total_quantity(&self) -> u32 {
        self.lines
            .iter()
            .fold(0u32, |total, l| total.saturating_add(l.quantity))
    }

    /// Returns the total from snapshot prices.
    pub fn total(&self) -> Money {
        self.lines.iter().map(LineItem::total_price).sum()
    }

    /// Returns when the cart was last synchronized with the store.
    pub fn last_synced_at(&self) -> DateTime<Utc> {
        self.last_synced_at
    }

    /// Returns the schema version string.
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Updates the sync timestamp.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_synced_at = at;
    }

    /// Adds a line. An existing line for the same key has its quantity
    /// increased and its metadata replaced by the incoming snapshot.
    pub fn add_line(&mut self, item: LineItem) -> Result<&LineItem, DomainError> {
        if item.quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity: 0 });
        }

        let key = item.key();
        match self.position(&key) {
            Some(idx) => {
                let existing = &mut self.lines[idx];
                existing.quantity = existing.quantity.saturating_add(item.quantity);
                existing.take_metadata_from(&item);
                Ok(&self.lines[idx])
            }
            None => {
                self.lines.push(item);
                Ok(&self.lines[self.lines.len() - 1])
            }
        }
    }

    /// Inserts a line or overwrites the existing line for the same key,
    /// keeping its position.
    pub fn put_line(&mut self, item: LineItem) -> Result<&LineItem, DomainError> {
        if item.quantity == 0 {
            return Err(DomainError::InvalidQuantity { quantity: 0 });
        }

        match self.position(&item.key()) {
            Some(idx) => {
                self.lines[idx] = item;
                Ok(&self.lines[idx])
            }
            None => {
                self.lines.push(item);
                Ok(&self.lines[self.lines.len() - 1])
            }
        }
    }

    /// Sets the quantity of an existing line. Zero removes the line.
    pub fn set_quantity(&mut self, key: &LineKey, quantity: u32) -> Result<(), DomainError> {
        let idx = self
            .position(key)
            .ok_or_else(|| DomainError::LineNotFound { key: key.clone() })?;

        if quantity == 0 {
            self.lines.remove(idx);
        } else {
            self.lines[idx].quantity = quantity;
        }
        Ok(())
    }

    /// Removes a line, returning it.
    pub fn remove_line(&mut self, key: &LineKey) -> Result<LineItem, DomainError> {
        let idx = self
            .position(key)
            .ok_or_else(|| DomainError::LineNotFound { key: key.clone() })?;
        Ok(self.lines.remove(idx))
    }

    /// Removes every line.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Returns the compact manifest used as payment-intent metadata.
    pub fn manifest(&self) -> Vec<ManifestEntry> {
        self.lines
            .iter()
            .map(|l| ManifestEntry {
                product_id: l.product_id.clone(),
                variant_id: l.variant_id.clone(),
                quantity: l.quantity,
                price: l.unit_price,
            })
            .collect()
    }

    fn position(&self, key: &LineKey) -> Option<usize> {
        self.lines
            .iter()
            .position(|l| l.product_id == key.product_id && l.variant_id == key.variant_id)
    }
}

/// Combines user and guest lines into one list with unique keys.
///
/// User lines keep their order; guest-only lines are appended in guest order.
pub fn merge_lines(user: Vec<LineItem>, guest: Vec<LineItem>) -> Vec<LineItem> {
    let mut merged = user;
    let mut index: HashMap<LineKey, usize> = merged
        .iter()
        .enumerate()
        .map(|(idx, line)| (line.key(), idx))
        .collect();

    for line in guest {
        let key = line.key();
        match index.get(&key) {
            Some(&idx) => {
                let existing = &mut merged[idx];
                existing.quantity = existing.quantity.saturating_add(line.quantity);
                if line.refreshed_at > existing.refreshed_at {
                    existing.take_metadata_from(&line);
                }
            }
            None => {
                index.insert(key, merged.len());
                merged.push(line);
            }
        }
    }

    merged
}
