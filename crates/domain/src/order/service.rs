//! Order service.

use chrono::Utc;
use common::{
    CartId, Money, Order, OrderId, OrderItem, OrderItemId, OrderStatus, PaymentStatus, Product,
    ProductId, StockOperation, UserId,
};
use store::{CartStore, OrderStore, ProductStore};

use crate::actor::Actor;
use crate::config::Settings;
use crate::error::{DomainError, Result};

use super::{OrderCreate, OrderItemInput, generate_order_number};

/// Service for order operations.
pub struct OrderService<S: OrderStore + CartStore + ProductStore> {
    store: S,
    settings: Settings,
}

impl<S: OrderStore + CartStore + ProductStore> OrderService<S> {
    pub fn new(store: S, settings: Settings) -> Self {
        Self { store, settings }
    }

    /// Converts a cart into an order.
    ///
    /// Every line is re-validated against current stock before anything is
    /// written (a second check beyond the cart's add-time check). The order
    /// and its items commit atomically; stock is then decremented per line.
    /// The caller deactivates the source cart afterwards.
    #[tracing::instrument(skip(self, data))]
    pub async fn create_from_cart(
        &self,
        cart_id: CartId,
        actor: &Actor,
        data: OrderCreate,
    ) -> Result<(Order, Vec<OrderItem>)> {
        let cart = self
            .store
            .get_cart(cart_id)
            .await?
            .ok_or_else(|| DomainError::NotFound("Cart not found".to_string()))?;
        if cart.user_id != Some(actor.user_id) {
            return Err(DomainError::Forbidden(
                "Cart does not belong to this user".to_string(),
            ));
        }
        let cart_items = self.store.list_cart_items(cart_id).await?;
        if cart_items.is_empty() {
            return Err(DomainError::BadRequest("Cart is empty".to_string()));
        }

        let mut lines = Vec::with_capacity(cart_items.len());
        for item in &cart_items {
            let product = self.require_sellable(item.product_id, item.quantity).await?;
            lines.push((product, item.quantity, item.unit_price));
        }

        let (order, items) = self
            .persist_order(actor.user_id, &data, &lines)
            .await?;

        for (product, quantity, _) in &lines {
            self.store
                .update_stock(product.id, *quantity, StockOperation::Subtract)
                .await?;
        }

        Ok((order, items))
    }

    /// Creates an order from an explicit item list, pricing each line from
    /// the product's current price. Stock is validated per line but not
    /// decremented on this path.
    #[tracing::instrument(skip(self, data))]
    pub async fn create_direct(
        &self,
        actor: &Actor,
        items: Vec<OrderItemInput>,
        data: OrderCreate,
    ) -> Result<(Order, Vec<OrderItem>)> {
        if items.is_empty() {
            return Err(DomainError::BadRequest(
                "Order must contain at least one item".to_string(),
            ));
        }

        let mut lines = Vec::with_capacity(items.len());
        for input in &items {
            if input.quantity == 0 {
                return Err(DomainError::BadRequest(
                    "Quantity must be greater than zero".to_string(),
                ));
            }
            let product = self
                .require_sellable(input.product_id, input.quantity)
                .await?;
            let unit_price = product.current_price();
            lines.push((product, input.quantity, unit_price));
        }

        self.persist_order(actor.user_id, &data, &lines).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn get(&self, order_id: OrderId, actor: &Actor) -> Result<Order> {
        let order = self.require_order(order_id).await?;
        if !actor.can_act_for(order.user_id) {
            return Err(DomainError::Forbidden(
                "Not allowed to view this order".to_string(),
            ));
        }
        Ok(order)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_by_number(&self, order_number: &str, actor: &Actor) -> Result<Order> {
        let order = self
            .store
            .get_order_by_number(order_number)
            .await?
            .ok_or_else(|| DomainError::NotFound("Order not found".to_string()))?;
        if !actor.can_act_for(order.user_id) {
            return Err(DomainError::Forbidden(
                "Not allowed to view this order".to_string(),
            ));
        }
        Ok(order)
    }

    pub async fn items(&self, order_id: OrderId, actor: &Actor) -> Result<Vec<OrderItem>> {
        self.get(order_id, actor).await?;
        Ok(self.store.list_order_items(order_id).await?)
    }

    pub async fn list_for_user(
        &self,
        user_id: UserId,
        skip: u64,
        limit: u64,
        actor: &Actor,
    ) -> Result<Vec<Order>> {
        if !actor.can_act_for(user_id) {
            return Err(DomainError::Forbidden(
                "Not allowed to view these orders".to_string(),
            ));
        }
        Ok(self.store.list_orders_by_user(user_id, skip, limit).await?)
    }

    /// Orders in a given status. Listing beyond the actor's own orders is a
    /// privileged operation.
    pub async fn list_by_status(
        &self,
        status: OrderStatus,
        user_id: Option<UserId>,
        skip: u64,
        limit: u64,
        actor: &Actor,
    ) -> Result<Vec<Order>> {
        if user_id != Some(actor.user_id) && !actor.is_superuser {
            return Err(DomainError::Forbidden(
                "Not allowed to view these orders".to_string(),
            ));
        }
        Ok(self
            .store
            .list_orders_by_status(status, user_id, skip, limit)
            .await?)
    }

    /// Advances the order status along the transition table. Privileged.
    ///
    /// `Shipped` stamps `shipped_at` and `Delivered` stamps `delivered_at`,
    /// each only if not already set.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
        actor: &Actor,
    ) -> Result<Order> {
        if !actor.is_superuser {
            return Err(DomainError::Forbidden(
                "Not allowed to update order status".to_string(),
            ));
        }
        let mut order = self.require_order(order_id).await?;
        if !order.status.can_transition_to(new_status) {
            return Err(DomainError::BadRequest(format!(
                "Invalid status transition from {} to {}",
                order.status, new_status
            )));
        }

        order.status = new_status;
        match new_status {
            OrderStatus::Shipped if order.shipped_at.is_none() => {
                order.shipped_at = Some(Utc::now());
            }
            OrderStatus::Delivered if order.delivered_at.is_none() => {
                order.delivered_at = Some(Utc::now());
            }
            _ => {}
        }
        Ok(self.store.update_order(order).await?)
    }

    /// Updates the payment status. Privileged.
    ///
    /// Marking a still-pending order as paid auto-advances it to confirmed.
    #[tracing::instrument(skip(self))]
    pub async fn update_payment_status(
        &self,
        order_id: OrderId,
        new_status: PaymentStatus,
        reference: Option<String>,
        actor: &Actor,
    ) -> Result<Order> {
        if !actor.is_superuser {
            return Err(DomainError::Forbidden(
                "Not allowed to update payment status".to_string(),
            ));
        }
        let mut order = self.require_order(order_id).await?;

        order.payment_status = new_status;
        if let Some(reference) = reference {
            order.payment_reference = Some(reference);
        }
        if new_status == PaymentStatus::Paid && order.status == OrderStatus::Pending {
            order.status = OrderStatus::Confirmed;
        }
        Ok(self.store.update_order(order).await?)
    }

    /// Cancels an order, restoring stock for every line when the order had
    /// already progressed past pending (stock was decremented at creation and
    /// confirmed orders hold it). The reason is appended to the notes.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_id: OrderId, reason: &str, actor: &Actor) -> Result<Order> {
        let mut order = self.require_order(order_id).await?;
        if !actor.can_act_for(order.user_id) {
            return Err(DomainError::Forbidden(
                "Not allowed to cancel this order".to_string(),
            ));
        }
        if order.status == OrderStatus::Cancelled {
            return Err(DomainError::BadRequest(
                "Order is already cancelled".to_string(),
            ));
        }
        if matches!(order.status, OrderStatus::Shipped | OrderStatus::Delivered) {
            return Err(DomainError::BadRequest(
                "Cannot cancel shipped or delivered orders".to_string(),
            ));
        }

        if matches!(
            order.status,
            OrderStatus::Confirmed | OrderStatus::Processing
        ) {
            let items = self.store.list_order_items(order_id).await?;
            for item in &items {
                self.store
                    .update_stock(item.product_id, item.quantity, StockOperation::Add)
                    .await?;
            }
        }

        order.notes = Some(match order.notes.take() {
            Some(notes) => format!("{notes}\nCancellation reason: {reason}"),
            None => format!("Cancellation reason: {reason}"),
        });
        order.status = OrderStatus::Cancelled;
        Ok(self.store.update_order(order).await?)
    }

    /// Attaches a carrier tracking number. Privileged.
    #[tracing::instrument(skip(self))]
    pub async fn add_tracking_number(
        &self,
        order_id: OrderId,
        tracking: String,
        actor: &Actor,
    ) -> Result<Order> {
        if !actor.is_superuser {
            return Err(DomainError::Forbidden(
                "Not allowed to update this order".to_string(),
            ));
        }
        let mut order = self.require_order(order_id).await?;
        order.tracking_number = Some(tracking);
        Ok(self.store.update_order(order).await?)
    }

    async fn require_order(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| DomainError::NotFound("Order not found".to_string()))
    }

    /// Product must exist, be active, and cover the requested quantity.
    async fn require_sellable(&self, product_id: ProductId, quantity: u32) -> Result<Product> {
        let product = self
            .store
            .get_product(product_id)
            .await?
            .ok_or_else(|| DomainError::BadRequest("Product not found".to_string()))?;
        if !product.is_active {
            return Err(DomainError::BadRequest(format!(
                "Product {} is not available",
                product.name
            )));
        }
        if product.stock_quantity < quantity {
            return Err(DomainError::BadRequest(format!(
                "Insufficient stock for product {}. Available: {}, Requested: {}",
                product.name, product.stock_quantity, quantity
            )));
        }
        Ok(product)
    }

    /// Builds and atomically persists the order with its snapshot items.
    async fn persist_order(
        &self,
        user_id: UserId,
        data: &OrderCreate,
        lines: &[(Product, u32, Money)],
    ) -> Result<(Order, Vec<OrderItem>)> {
        let now = Utc::now();
        let subtotal: Money = lines
            .iter()
            .map(|(_, quantity, unit_price)| unit_price.multiply(*quantity))
            .sum();
        let tax_amount = subtotal.percent(self.settings.tax_rate_percent);
        let shipping_cost = if subtotal >= self.settings.free_shipping_threshold {
            Money::zero()
        } else {
            self.settings.standard_shipping_fee
        };
        let discount_amount = Money::zero();
        let total_amount = subtotal + tax_amount + shipping_cost - discount_amount;

        let order = Order {
            id: OrderId::new(0),
            order_number: generate_order_number(now),
            user_id,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            subtotal,
            tax_amount,
            shipping_cost,
            discount_amount,
            total_amount,
            shipping_address: data.shipping_address.clone(),
            shipping_city: data.shipping_city.clone(),
            shipping_country: data.shipping_country.clone(),
            shipping_postal_code: data.shipping_postal_code.clone(),
            shipping_phone: data.shipping_phone.clone(),
            billing_address: data.billing_address.clone(),
            billing_city: data.billing_city.clone(),
            billing_country: data.billing_country.clone(),
            billing_postal_code: data.billing_postal_code.clone(),
            notes: data.notes.clone(),
            tracking_number: None,
            payment_method: data.payment_method.clone(),
            payment_reference: None,
            created_at: now,
            updated_at: None,
            shipped_at: None,
            delivered_at: None,
        };

        let items = lines
            .iter()
            .map(|(product, quantity, unit_price)| OrderItem {
                id: OrderItemId::new(0),
                order_id: OrderId::new(0),
                product_id: product.id,
                product_name: product.name.clone(),
                product_sku: product.sku.clone(),
                quantity: *quantity,
                unit_price: *unit_price,
                total_price: unit_price.multiply(*quantity),
                created_at: now,
            })
            .collect();

        Ok(self.store.insert_order(order, items).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use common::{CategoryId, ProductId};
    use store::{CategoryStore, MemoryStore};

    async fn seed_product(store: &MemoryStore, sku: &str, price_units: i64, stock: u32) -> Product {
        let category = store
            .insert_category(common::Category {
                id: CategoryId::new(0),
                name: format!("Category {sku}"),
                slug: format!("category-{sku}").to_lowercase(),
                description: None,
                image_url: None,
                is_active: true,
                parent_id: None,
                sort_order: 0,
                created_at: Utc::now(),
                updated_at: None,
            })
            .await
            .unwrap();
        store
            .insert_product(Product {
                id: ProductId::new(0),
                name: format!("Product {sku}"),
                description: None,
                short_description: None,
                slug: sku.to_lowercase(),
                sku: sku.to_string(),
                price: Money::from_units(price_units),
                sale_price: None,
                cost_price: None,
                stock_quantity: stock,
                min_stock_level: 0,
                is_active: true,
                is_featured: false,
                images: vec![],
                attributes: None,
                category_id: category.id,
                created_at: Utc::now(),
                updated_at: None,
            })
            .await
            .unwrap()
    }

    fn order_data() -> OrderCreate {
        OrderCreate {
            shipping_address: "1 Main St".to_string(),
            shipping_city: "Springfield".to_string(),
            shipping_country: "US".to_string(),
            shipping_postal_code: "12345".to_string(),
            shipping_phone: None,
            billing_address: None,
            billing_city: None,
            billing_country: None,
            billing_postal_code: None,
            notes: None,
            payment_method: Some("card".to_string()),
        }
    }

    fn service(store: &MemoryStore) -> OrderService<MemoryStore> {
        OrderService::new(store.clone(), Settings::default())
    }

    async fn direct_order(
        store: &MemoryStore,
        actor: &Actor,
        product_id: ProductId,
        quantity: u32,
    ) -> Order {
        let (order, _) = service(store)
            .create_direct(
                actor,
                vec![OrderItemInput {
                    product_id,
                    quantity,
                }],
                order_data(),
            )
            .await
            .unwrap();
        order
    }

    #[tokio::test]
    async fn create_direct_validates_but_does_not_decrement_stock() {
        let store = MemoryStore::new();
        let product = seed_product(&store, "SKU-1", 50, 5).await;
        let actor = Actor::user(UserId::new(1));

        direct_order(&store, &actor, product.id, 2).await;
        let after = store.get_product(product.id).await.unwrap().unwrap();
        assert_eq!(after.stock_quantity, 5);

        let err = service(&store)
            .create_direct(
                &actor,
                vec![OrderItemInput {
                    product_id: product.id,
                    quantity: 6,
                }],
                order_data(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected_with_both_states_named() {
        let store = MemoryStore::new();
        let product = seed_product(&store, "SKU-1", 50, 5).await;
        let actor = Actor::user(UserId::new(1));
        let admin = Actor::superuser(UserId::new(9));
        let order = direct_order(&store, &actor, product.id, 1).await;

        let err = service(&store)
            .update_status(order.id, OrderStatus::Shipped, &admin)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid status transition from pending to shipped"
        );
    }

    #[tokio::test]
    async fn update_status_requires_privilege() {
        let store = MemoryStore::new();
        let product = seed_product(&store, "SKU-1", 50, 5).await;
        let actor = Actor::user(UserId::new(1));
        let order = direct_order(&store, &actor, product.id, 1).await;

        let err = service(&store)
            .update_status(order.id, OrderStatus::Confirmed, &actor)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn paying_a_pending_order_auto_confirms_it() {
        let store = MemoryStore::new();
        let product = seed_product(&store, "SKU-1", 50, 5).await;
        let actor = Actor::user(UserId::new(1));
        let admin = Actor::superuser(UserId::new(9));
        let order = direct_order(&store, &actor, product.id, 1).await;

        let order = service(&store)
            .update_payment_status(
                order.id,
                PaymentStatus::Paid,
                Some("PAY-1".to_string()),
                &admin,
            )
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.payment_reference.as_deref(), Some("PAY-1"));
    }

    #[tokio::test]
    async fn cancelling_twice_is_rejected() {
        let store = MemoryStore::new();
        let product = seed_product(&store, "SKU-1", 50, 5).await;
        let actor = Actor::user(UserId::new(1));
        let order = direct_order(&store, &actor, product.id, 1).await;

        service(&store)
            .cancel(order.id, "changed my mind", &actor)
            .await
            .unwrap();
        let err = service(&store)
            .cancel(order.id, "again", &actor)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Order is already cancelled");
    }

    #[tokio::test]
    async fn cancel_appends_the_reason_to_notes() {
        let store = MemoryStore::new();
        let product = seed_product(&store, "SKU-1", 50, 5).await;
        let actor = Actor::user(UserId::new(1));
        let order = direct_order(&store, &actor, product.id, 1).await;

        let cancelled = service(&store)
            .cancel(order.id, "changed my mind", &actor)
            .await
            .unwrap();
        assert_eq!(
            cancelled.notes.as_deref(),
            Some("Cancellation reason: changed my mind")
        );
    }

    #[tokio::test]
    async fn tracking_number_is_privileged() {
        let store = MemoryStore::new();
        let product = seed_product(&store, "SKU-1", 50, 5).await;
        let actor = Actor::user(UserId::new(1));
        let admin = Actor::superuser(UserId::new(9));
        let order = direct_order(&store, &actor, product.id, 1).await;

        let err = service(&store)
            .add_tracking_number(order.id, "TRACK-1".to_string(), &actor)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let order = service(&store)
            .add_tracking_number(order.id, "TRACK-1".to_string(), &admin)
            .await
            .unwrap();
        assert_eq!(order.tracking_number.as_deref(), Some("TRACK-1"));
    }
}
