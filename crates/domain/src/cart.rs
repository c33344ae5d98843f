//! Shopping cart engine.

use chrono::{Duration, Utc};
use common::{
    Cart, CartId, CartItem, CartItemId, CartOwner, CartWithItems, Money, ProductId, UserId,
};
use store::{CartStore, ProductStore, StoreError};

use crate::actor::Actor;
use crate::config::Settings;
use crate::error::{DomainError, Result};

/// Per-item stock satisfiability report from [`CartService::validate_stock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockCheck {
    pub item_id: CartItemId,
    pub product_id: ProductId,
    pub requested: u32,
    pub available: u32,
    pub satisfiable: bool,
    pub reason: Option<String>,
}

/// Recomputed cart totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartSummary {
    pub total_items: u32,
    pub total_amount: Money,
}

/// Service for cart operations.
///
/// A cart is `active` until it is merged or converted to an order; once
/// inactive it is terminal and only the retention sweep touches it.
pub struct CartService<S: CartStore + ProductStore> {
    store: S,
    settings: Settings,
}

impl<S: CartStore + ProductStore> CartService<S> {
    pub fn new(store: S, settings: Settings) -> Self {
        Self { store, settings }
    }

    /// Returns the owner's active cart, creating one if none exists.
    #[tracing::instrument(skip(self))]
    pub async fn get_or_create(&self, owner: &CartOwner) -> Result<CartWithItems> {
        if let Some(cart) = self.store.get_active_cart(owner).await? {
            return self.with_items(cart).await;
        }
        let cart = match self.store.insert_cart(Cart::for_owner(owner)).await {
            Ok(cart) => cart,
            // lost a create race; the winner's cart is the right answer
            Err(StoreError::UniqueViolation { .. }) => self
                .store
                .get_active_cart(owner)
                .await?
                .ok_or_else(|| DomainError::NotFound("Cart not found".to_string()))?,
            Err(e) => return Err(e.into()),
        };
        self.with_items(cart).await
    }

    /// Lookup without creation.
    pub async fn get_active(&self, owner: &CartOwner) -> Result<Option<CartWithItems>> {
        match self.store.get_active_cart(owner).await? {
            Some(cart) => Ok(Some(self.with_items(cart).await?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn get(&self, cart_id: CartId) -> Result<CartWithItems> {
        let cart = self.require_cart(cart_id).await?;
        self.with_items(cart).await
    }

    /// Adds a product to the cart.
    ///
    /// Re-adding an existing product increments the row's quantity and
    /// re-validates the combined quantity against current stock. New rows
    /// snapshot the product's current price.
    #[tracing::instrument(skip(self))]
    pub async fn add_item(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartItem> {
        if quantity == 0 {
            return Err(DomainError::BadRequest(
                "Quantity must be greater than zero".to_string(),
            ));
        }
        let cart = self.require_cart(cart_id).await?;
        if !cart.is_active {
            return Err(DomainError::BadRequest("Cart is not active".to_string()));
        }
        let product = self
            .store
            .get_product(product_id)
            .await?
            .ok_or_else(|| DomainError::BadRequest("Product not found".to_string()))?;
        if !product.is_active {
            return Err(DomainError::BadRequest(
                "Product is not available".to_string(),
            ));
        }

        match self
            .store
            .get_cart_item_by_product(cart_id, product_id)
            .await?
        {
            Some(mut existing) => {
                let combined = combined_quantity(&product, existing.quantity, quantity)?;
                require_stock(&product, combined)?;
                existing.quantity = combined;
                Ok(self.store.update_cart_item(existing).await?)
            }
            None => {
                require_stock(&product, quantity)?;
                let item = CartItem {
                    id: CartItemId::new(0),
                    cart_id,
                    product_id,
                    quantity,
                    unit_price: product.current_price(),
                    created_at: Utc::now(),
                    updated_at: None,
                };
                Ok(self.store.insert_cart_item(item).await?)
            }
        }
    }

    /// Sets an item's absolute quantity, re-validating stock. Ownership is
    /// checked for user-owned carts.
    #[tracing::instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        item_id: CartItemId,
        quantity: u32,
        requester: Option<&Actor>,
    ) -> Result<CartItem> {
        if quantity == 0 {
            return Err(DomainError::BadRequest(
                "Quantity must be greater than zero".to_string(),
            ));
        }
        let mut item = self
            .store
            .get_cart_item(item_id)
            .await?
            .ok_or_else(|| DomainError::NotFound("Cart item not found".to_string()))?;
        let cart = self.require_cart(item.cart_id).await?;
        check_ownership(&cart, requester)?;

        let product = self
            .store
            .get_product(item.product_id)
            .await?
            .ok_or_else(|| DomainError::BadRequest("Product not found".to_string()))?;
        require_stock(&product, quantity)?;

        item.quantity = quantity;
        Ok(self.store.update_cart_item(item).await?)
    }

    /// Removes a single item. Ownership-checked.
    #[tracing::instrument(skip(self))]
    pub async fn remove_item(&self, item_id: CartItemId, requester: Option<&Actor>) -> Result<()> {
        let item = self
            .store
            .get_cart_item(item_id)
            .await?
            .ok_or_else(|| DomainError::NotFound("Cart item not found".to_string()))?;
        let cart = self.require_cart(item.cart_id).await?;
        check_ownership(&cart, requester)?;

        self.store.delete_cart_item(item_id).await?;
        Ok(())
    }

    /// Removes an item by product. Ownership-checked.
    #[tracing::instrument(skip(self))]
    pub async fn remove_by_product(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        requester: Option<&Actor>,
    ) -> Result<()> {
        let cart = self.require_cart(cart_id).await?;
        check_ownership(&cart, requester)?;

        if !self
            .store
            .delete_cart_item_by_product(cart_id, product_id)
            .await?
        {
            return Err(DomainError::NotFound("Cart item not found".to_string()));
        }
        Ok(())
    }

    /// Removes every item from the cart. Ownership-checked.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self, cart_id: CartId, requester: Option<&Actor>) -> Result<u64> {
        let cart = self.require_cart(cart_id).await?;
        check_ownership(&cart, requester)?;
        Ok(self.store.clear_cart_items(cart_id).await?)
    }

    /// Merges the session-owned cart into the user's cart, then deactivates
    /// the session cart. All-or-nothing.
    ///
    /// When both carts hold the same product the quantities are summed and
    /// the user cart's price snapshot is kept; items new to the user cart
    /// bring their own snapshot over.
    #[tracing::instrument(skip(self))]
    pub async fn merge(&self, user_id: UserId, session_id: &str) -> Result<CartWithItems> {
        let user_cart = self.get_or_create(&CartOwner::User(user_id)).await?;
        let session_cart = match self
            .store
            .get_active_cart(&CartOwner::Session(session_id.to_string()))
            .await?
        {
            Some(cart) => cart,
            None => return Ok(user_cart),
        };

        let session_items = self.store.list_cart_items(session_cart.id).await?;
        let mut merged = Vec::with_capacity(session_items.len());
        for session_item in session_items {
            match user_cart
                .items
                .iter()
                .find(|i| i.product_id == session_item.product_id)
            {
                Some(existing) => {
                    let mut item = existing.clone();
                    item.quantity = existing
                        .quantity
                        .checked_add(session_item.quantity)
                        .ok_or_else(|| {
                            DomainError::BadRequest(format!(
                                "Quantity for product {} is too large",
                                session_item.product_id
                            ))
                        })?;
                    merged.push(item);
                }
                None => {
                    let mut item = session_item;
                    item.id = CartItemId::new(0);
                    item.cart_id = user_cart.cart.id;
                    merged.push(item);
                }
            }
        }

        self.store
            .apply_cart_merge(user_cart.cart.id, session_cart.id, merged)
            .await?;
        self.get(user_cart.cart.id).await
    }

    /// Read-only stock satisfiability report for every item, used before
    /// order creation.
    #[tracing::instrument(skip(self))]
    pub async fn validate_stock(&self, cart_id: CartId) -> Result<Vec<StockCheck>> {
        let cart = self.get(cart_id).await?;
        let mut checks = Vec::with_capacity(cart.items.len());
        for item in &cart.items {
            let check = match self.store.get_product(item.product_id).await? {
                None => StockCheck {
                    item_id: item.id,
                    product_id: item.product_id,
                    requested: item.quantity,
                    available: 0,
                    satisfiable: false,
                    reason: Some("Product no longer exists".to_string()),
                },
                Some(product) if !product.is_active => StockCheck {
                    item_id: item.id,
                    product_id: item.product_id,
                    requested: item.quantity,
                    available: product.stock_quantity,
                    satisfiable: false,
                    reason: Some("Product is not available".to_string()),
                },
                Some(product) => {
                    let satisfiable = product.stock_quantity >= item.quantity;
                    StockCheck {
                        item_id: item.id,
                        product_id: item.product_id,
                        requested: item.quantity,
                        available: product.stock_quantity,
                        satisfiable,
                        reason: (!satisfiable).then(|| {
                            format!(
                                "Insufficient stock for product {}. Available: {}, Requested: {}",
                                product.name, product.stock_quantity, item.quantity
                            )
                        }),
                    }
                }
            };
            checks.push(check);
        }
        Ok(checks)
    }

    /// Item count and monetary total, recomputed from current rows.
    pub async fn summary(&self, cart_id: CartId) -> Result<CartSummary> {
        let cart = self.get(cart_id).await?;
        Ok(CartSummary {
            total_items: cart.total_items(),
            total_amount: cart.total_amount(),
        })
    }

    /// Re-snapshots every item's unit price from the product's current price.
    /// Items whose product is gone or inactive are left untouched. Returns
    /// the number of items repriced.
    #[tracing::instrument(skip(self))]
    pub async fn refresh_prices(&self, cart_id: CartId) -> Result<u64> {
        let cart = self.get(cart_id).await?;
        let mut repriced = 0;
        for item in cart.items {
            if let Some(product) = self.store.get_product(item.product_id).await?
                && product.is_active
                && product.current_price() != item.unit_price
            {
                let mut item = item;
                item.unit_price = product.current_price();
                self.store.update_cart_item(item).await?;
                repriced += 1;
            }
        }
        Ok(repriced)
    }

    /// Marks a cart inactive (merged or converted). Ownership-checked; there
    /// is no reactivation path.
    #[tracing::instrument(skip(self))]
    pub async fn deactivate(&self, cart_id: CartId, requester: Option<&Actor>) -> Result<Cart> {
        let mut cart = self.require_cart(cart_id).await?;
        check_ownership(&cart, requester)?;
        cart.is_active = false;
        Ok(self.store.update_cart(cart).await?)
    }

    /// Retention sweep: deletes inactive carts (and their items) last touched
    /// more than the configured number of days ago. Best-effort per cart;
    /// returns the count removed.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup_inactive_carts(&self) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(self.settings.cart_retention_days);
        let stale = self
            .store
            .list_inactive_carts_before(cutoff, u64::MAX)
            .await?;

        let mut removed = 0;
        for cart in stale {
            match self.store.delete_cart(cart.id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(cart_id = %cart.id, error = %e, "failed to delete stale cart");
                }
            }
        }
        tracing::debug!(removed, "cart retention sweep finished");
        Ok(removed)
    }

    async fn require_cart(&self, cart_id: CartId) -> Result<Cart> {
        self.store
            .get_cart(cart_id)
            .await?
            .ok_or_else(|| DomainError::NotFound("Cart not found".to_string()))
    }

    async fn with_items(&self, cart: Cart) -> Result<CartWithItems> {
        let items = self.store.list_cart_items(cart.id).await?;
        Ok(CartWithItems { cart, items })
    }
}

/// A user-owned cart may only be mutated by its owner or a superuser;
/// session carts carry no user identity to check.
fn check_ownership(cart: &Cart, requester: Option<&Actor>) -> Result<()> {
    if let Some(owner_id) = cart.user_id
        && !requester.is_some_and(|actor| actor.can_act_for(owner_id))
    {
        return Err(DomainError::Forbidden(
            "Not allowed to modify this cart".to_string(),
        ));
    }
    Ok(())
}

/// Sums a row's quantity with an increment. A sum past `u32::MAX` cannot be
/// covered by any stock level, so it reports as insufficient stock.
fn combined_quantity(product: &common::Product, current: u32, added: u32) -> Result<u32> {
    current.checked_add(added).ok_or_else(|| {
        DomainError::BadRequest(format!(
            "Insufficient stock for product {}. Available: {}, Requested: {}",
            product.name,
            product.stock_quantity,
            u64::from(current) + u64::from(added)
        ))
    })
}

fn require_stock(product: &common::Product, quantity: u32) -> Result<()> {
    if product.stock_quantity < quantity {
        return Err(DomainError::BadRequest(format!(
            "Insufficient stock for product {}. Available: {}, Requested: {}",
            product.name, product.stock_quantity, quantity
        )));
    }
    Ok(())
}
