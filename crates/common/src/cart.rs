//! Shopping cart records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CartId, CartItemId, Money, ProductId, UserId};

/// Cart ownership discriminator.
///
/// A cart belongs to exactly one of a user account or an anonymous session.
/// The enum makes "exactly one owner key" unrepresentable to get wrong.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CartOwner {
    User(UserId),
    Session(String),
}

/// A shopping cart.
///
/// At most one active cart exists per owner key. Deactivated carts (merged or
/// converted to an order) are retained for audit until the retention sweep
/// removes them; there is no reactivation path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub user_id: Option<UserId>,
    pub session_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Cart {
    /// Builds a new active cart for the given owner (id assigned by the store).
    pub fn for_owner(owner: &CartOwner) -> Self {
        let (user_id, session_id) = match owner {
            CartOwner::User(id) => (Some(*id), None),
            CartOwner::Session(sid) => (None, Some(sid.clone())),
        };
        Self {
            id: CartId::new(0),
            user_id,
            session_id,
            is_active: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Returns the owner key of this cart, if well-formed.
    pub fn owner(&self) -> Option<CartOwner> {
        match (self.user_id, &self.session_id) {
            (Some(uid), _) => Some(CartOwner::User(uid)),
            (None, Some(sid)) => Some(CartOwner::Session(sid.clone())),
            (None, None) => None,
        }
    }
}

/// A line item in a cart.
///
/// `unit_price` is snapshotted from the product's current price at the time
/// the item is added; later catalog changes do not retroactively reprice it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: CartItemId,
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CartItem {
    /// Line subtotal, computed on read.
    pub fn subtotal(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A cart together with its line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartWithItems {
    pub cart: Cart,
    pub items: Vec<CartItem>,
}

impl CartWithItems {
    /// Sum of all item quantities.
    pub fn total_items(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    /// Monetary total, recomputed from the item rows.
    pub fn total_amount(&self) -> Money {
        self.items.iter().map(|i| i.subtotal()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(qty: u32, cents: i64) -> CartItem {
        CartItem {
            id: CartItemId::new(1),
            cart_id: CartId::new(1),
            product_id: ProductId::new(1),
            quantity: qty,
            unit_price: Money::from_cents(cents),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn subtotal_is_price_times_quantity() {
        assert_eq!(item(3, 1050).subtotal().cents(), 3150);
    }

    #[test]
    fn cart_for_owner_sets_exactly_one_key() {
        let user_cart = Cart::for_owner(&CartOwner::User(UserId::new(5)));
        assert_eq!(user_cart.user_id, Some(UserId::new(5)));
        assert_eq!(user_cart.session_id, None);
        assert!(user_cart.is_active);

        let session_cart = Cart::for_owner(&CartOwner::Session("abc".into()));
        assert_eq!(session_cart.user_id, None);
        assert_eq!(session_cart.session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn totals_recompute_from_items() {
        let cart = CartWithItems {
            cart: Cart::for_owner(&CartOwner::Session("s".into())),
            items: vec![item(2, 5000), item(1, 3000)],
        };
        assert_eq!(cart.total_items(), 3);
        assert_eq!(cart.total_amount().cents(), 13000);
    }
}
