//! In-memory store implementation.
//!
//! Backs every test suite and provides the same interface and constraint
//! behaviour as the PostgreSQL implementation: id assignment, unique
//! constraints (surfaced as [`StoreError::UniqueViolation`]), cascade deletes,
//! and single-lock atomicity for the multi-row operations.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use common::{
    Cart, CartId, CartItem, CartItemId, CartOwner, Category, CategoryId, Order, OrderId,
    OrderItem, OrderItemId, OrderStatus, Product, ProductId, ProductSearch, SortField, SortOrder,
    StockOperation, User, UserId,
};

use crate::traits::{CartStore, CategoryStore, OrderStore, ProductStore, UserStore};
use crate::{Result, StoreError};

#[derive(Debug, Default)]
struct State {
    users: BTreeMap<i64, User>,
    categories: BTreeMap<i64, Category>,
    products: BTreeMap<i64, Product>,
    carts: BTreeMap<i64, Cart>,
    cart_items: BTreeMap<i64, CartItem>,
    orders: BTreeMap<i64, Order>,
    order_items: BTreeMap<i64, OrderItem>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Thread-safe in-memory store.
///
/// Cloning is cheap; clones share the same underlying state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all stored rows.
    pub async fn clear(&self) {
        *self.state.write().await = State::default();
    }
}

fn page<T>(rows: impl Iterator<Item = T>, skip: u64, limit: u64) -> Vec<T> {
    rows.skip(skip as usize).take(limit as usize).collect()
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, mut user: User) -> Result<User> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::UniqueViolation {
                entity: "users",
                field: "email",
            });
        }
        if state.users.values().any(|u| u.username == user.username) {
            return Err(StoreError::UniqueViolation {
                entity: "users",
                field: "username",
            });
        }
        user.id = UserId::new(state.next_id());
        state.users.insert(user.id.as_i64(), user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(&id.as_i64()).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn list_users(&self, skip: u64, limit: u64) -> Result<Vec<User>> {
        let state = self.state.read().await;
        Ok(page(state.users.values().cloned(), skip, limit))
    }

    async fn update_user(&self, mut user: User) -> Result<User> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&user.id.as_i64()) {
            return Err(StoreError::MissingRow {
                entity: "users",
                id: user.id.as_i64(),
            });
        }
        user.updated_at = Some(Utc::now());
        state.users.insert(user.id.as_i64(), user.clone());
        Ok(user)
    }

    async fn delete_user(&self, id: UserId) -> Result<bool> {
        Ok(self.state.write().await.users.remove(&id.as_i64()).is_some())
    }
}

#[async_trait]
impl CategoryStore for MemoryStore {
    async fn insert_category(&self, mut category: Category) -> Result<Category> {
        let mut state = self.state.write().await;
        if state.categories.values().any(|c| c.name == category.name) {
            return Err(StoreError::UniqueViolation {
                entity: "categories",
                field: "name",
            });
        }
        if state.categories.values().any(|c| c.slug == category.slug) {
            return Err(StoreError::UniqueViolation {
                entity: "categories",
                field: "slug",
            });
        }
        category.id = CategoryId::new(state.next_id());
        state.categories.insert(category.id.as_i64(), category.clone());
        Ok(category)
    }

    async fn get_category(&self, id: CategoryId) -> Result<Option<Category>> {
        Ok(self.state.read().await.categories.get(&id.as_i64()).cloned())
    }

    async fn get_category_by_name(&self, name: &str) -> Result<Option<Category>> {
        let state = self.state.read().await;
        Ok(state.categories.values().find(|c| c.name == name).cloned())
    }

    async fn get_category_by_slug(&self, slug: &str) -> Result<Option<Category>> {
        let state = self.state.read().await;
        Ok(state.categories.values().find(|c| c.slug == slug).cloned())
    }

    async fn list_categories(
        &self,
        parent: Option<Option<CategoryId>>,
        active_only: bool,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Category>> {
        let state = self.state.read().await;
        let mut rows: Vec<Category> = state
            .categories
            .values()
            .filter(|c| match parent {
                None => true,
                Some(p) => c.parent_id == p,
            })
            .filter(|c| !active_only || c.is_active)
            .cloned()
            .collect();
        rows.sort_by_key(|c| (c.sort_order, c.id.as_i64()));
        Ok(page(rows.into_iter(), skip, limit))
    }

    async fn update_category(&self, mut category: Category) -> Result<Category> {
        let mut state = self.state.write().await;
        if !state.categories.contains_key(&category.id.as_i64()) {
            return Err(StoreError::MissingRow {
                entity: "categories",
                id: category.id.as_i64(),
            });
        }
        category.updated_at = Some(Utc::now());
        state.categories.insert(category.id.as_i64(), category.clone());
        Ok(category)
    }

    async fn delete_category(&self, id: CategoryId) -> Result<bool> {
        // No cascade: children keep their (now dangling) parent_id.
        Ok(self
            .state
            .write()
            .await
            .categories
            .remove(&id.as_i64())
            .is_some())
    }

    async fn count_categories(&self, active_only: bool) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .categories
            .values()
            .filter(|c| !active_only || c.is_active)
            .count() as u64)
    }
}

fn matches_search(product: &Product, search: &ProductSearch) -> bool {
    if let Some(ref q) = search.query {
        let q = q.to_lowercase();
        let hit = product.name.to_lowercase().contains(&q)
            || product
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&q))
            || product.sku.to_lowercase().contains(&q);
        if !hit {
            return false;
        }
    }
    if let Some(category_id) = search.category_id
        && product.category_id != category_id
    {
        return false;
    }
    if let Some(min) = search.min_price
        && product.price < min
    {
        return false;
    }
    if let Some(max) = search.max_price
        && product.price > max
    {
        return false;
    }
    if let Some(featured) = search.is_featured
        && product.is_featured != featured
    {
        return false;
    }
    if let Some(in_stock) = search.in_stock
        && product.is_in_stock() != in_stock
    {
        return false;
    }
    true
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn insert_product(&self, mut product: Product) -> Result<Product> {
        let mut state = self.state.write().await;
        if state.products.values().any(|p| p.sku == product.sku) {
            return Err(StoreError::UniqueViolation {
                entity: "products",
                field: "sku",
            });
        }
        if state.products.values().any(|p| p.slug == product.slug) {
            return Err(StoreError::UniqueViolation {
                entity: "products",
                field: "slug",
            });
        }
        product.id = ProductId::new(state.next_id());
        state.products.insert(product.id.as_i64(), product.clone());
        Ok(product)
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&id.as_i64()).cloned())
    }

    async fn get_product_by_sku(&self, sku: &str) -> Result<Option<Product>> {
        let state = self.state.read().await;
        Ok(state.products.values().find(|p| p.sku == sku).cloned())
    }

    async fn get_product_by_slug(&self, slug: &str) -> Result<Option<Product>> {
        let state = self.state.read().await;
        Ok(state.products.values().find(|p| p.slug == slug).cloned())
    }

    async fn list_products_by_category(
        &self,
        category_id: CategoryId,
        active_only: bool,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Product>> {
        let state = self.state.read().await;
        Ok(page(
            state
                .products
                .values()
                .filter(|p| p.category_id == category_id)
                .filter(|p| !active_only || p.is_active)
                .cloned(),
            skip,
            limit,
        ))
    }

    async fn search_products(
        &self,
        search: &ProductSearch,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Product>> {
        let state = self.state.read().await;
        let mut rows: Vec<Product> = state
            .products
            .values()
            .filter(|p| matches_search(p, search))
            .cloned()
            .collect();

        if let Some(field) = search.sort_by {
            rows.sort_by(|a, b| {
                let ord = match field {
                    SortField::Name => a.name.cmp(&b.name),
                    SortField::Price => a.price.cmp(&b.price),
                    SortField::CreatedAt => a.created_at.cmp(&b.created_at),
                    SortField::StockQuantity => a.stock_quantity.cmp(&b.stock_quantity),
                };
                match search.sort_order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            });
        }

        Ok(page(rows.into_iter(), skip, limit))
    }

    async fn list_featured(&self, skip: u64, limit: u64) -> Result<Vec<Product>> {
        let state = self.state.read().await;
        Ok(page(
            state
                .products
                .values()
                .filter(|p| p.is_featured && p.is_active)
                .cloned(),
            skip,
            limit,
        ))
    }

    async fn list_low_stock(&self, skip: u64, limit: u64) -> Result<Vec<Product>> {
        let state = self.state.read().await;
        Ok(page(
            state.products.values().filter(|p| p.is_low_stock()).cloned(),
            skip,
            limit,
        ))
    }

    async fn update_product(&self, mut product: Product) -> Result<Product> {
        let mut state = self.state.write().await;
        let Some(existing) = state.products.get(&product.id.as_i64()) else {
            return Err(StoreError::MissingRow {
                entity: "products",
                id: product.id.as_i64(),
            });
        };
        // stock moves only through update_stock
        product.stock_quantity = existing.stock_quantity;
        product.updated_at = Some(Utc::now());
        state.products.insert(product.id.as_i64(), product.clone());
        Ok(product)
    }

    async fn update_stock(
        &self,
        id: ProductId,
        quantity: u32,
        operation: StockOperation,
    ) -> Result<Option<Product>> {
        let mut state = self.state.write().await;
        let Some(product) = state.products.get_mut(&id.as_i64()) else {
            return Ok(None);
        };
        if operation == StockOperation::Subtract && quantity > product.stock_quantity {
            tracing::warn!(
                product_id = %id,
                available = product.stock_quantity,
                requested = quantity,
                "stock subtraction clipped at zero"
            );
        }
        product.apply_stock_operation(quantity, operation);
        product.updated_at = Some(Utc::now());
        Ok(Some(product.clone()))
    }

    async fn count_products_in_category(&self, category_id: CategoryId) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .products
            .values()
            .filter(|p| p.category_id == category_id)
            .count() as u64)
    }
}

fn owner_matches(cart: &Cart, owner: &CartOwner) -> bool {
    match owner {
        CartOwner::User(uid) => cart.user_id == Some(*uid),
        CartOwner::Session(sid) => cart.session_id.as_deref() == Some(sid.as_str()),
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn insert_cart(&self, mut cart: Cart) -> Result<Cart> {
        let mut state = self.state.write().await;
        if let Some(owner) = cart.owner()
            && cart.is_active
            && state
                .carts
                .values()
                .any(|c| c.is_active && owner_matches(c, &owner))
        {
            return Err(StoreError::UniqueViolation {
                entity: "carts",
                field: "owner",
            });
        }
        cart.id = CartId::new(state.next_id());
        state.carts.insert(cart.id.as_i64(), cart.clone());
        Ok(cart)
    }

    async fn get_cart(&self, id: CartId) -> Result<Option<Cart>> {
        Ok(self.state.read().await.carts.get(&id.as_i64()).cloned())
    }

    async fn get_active_cart(&self, owner: &CartOwner) -> Result<Option<Cart>> {
        let state = self.state.read().await;
        Ok(state
            .carts
            .values()
            .find(|c| c.is_active && owner_matches(c, owner))
            .cloned())
    }

    async fn update_cart(&self, mut cart: Cart) -> Result<Cart> {
        let mut state = self.state.write().await;
        if !state.carts.contains_key(&cart.id.as_i64()) {
            return Err(StoreError::MissingRow {
                entity: "carts",
                id: cart.id.as_i64(),
            });
        }
        cart.updated_at = Some(Utc::now());
        state.carts.insert(cart.id.as_i64(), cart.clone());
        Ok(cart)
    }

    async fn delete_cart(&self, id: CartId) -> Result<bool> {
        let mut state = self.state.write().await;
        let removed = state.carts.remove(&id.as_i64()).is_some();
        if removed {
            state.cart_items.retain(|_, item| item.cart_id != id);
        }
        Ok(removed)
    }

    async fn list_inactive_carts_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Cart>> {
        let state = self.state.read().await;
        Ok(page(
            state
                .carts
                .values()
                .filter(|c| !c.is_active && c.updated_at.unwrap_or(c.created_at) < cutoff)
                .cloned(),
            0,
            limit,
        ))
    }

    async fn insert_cart_item(&self, mut item: CartItem) -> Result<CartItem> {
        let mut state = self.state.write().await;
        if state
            .cart_items
            .values()
            .any(|i| i.cart_id == item.cart_id && i.product_id == item.product_id)
        {
            return Err(StoreError::UniqueViolation {
                entity: "cart_items",
                field: "cart_id_product_id",
            });
        }
        item.id = CartItemId::new(state.next_id());
        state.cart_items.insert(item.id.as_i64(), item.clone());
        Ok(item)
    }

    async fn get_cart_item(&self, id: CartItemId) -> Result<Option<CartItem>> {
        Ok(self.state.read().await.cart_items.get(&id.as_i64()).cloned())
    }

    async fn get_cart_item_by_product(
        &self,
        cart_id: CartId,
        product_id: ProductId,
    ) -> Result<Option<CartItem>> {
        let state = self.state.read().await;
        Ok(state
            .cart_items
            .values()
            .find(|i| i.cart_id == cart_id && i.product_id == product_id)
            .cloned())
    }

    async fn list_cart_items(&self, cart_id: CartId) -> Result<Vec<CartItem>> {
        let state = self.state.read().await;
        Ok(state
            .cart_items
            .values()
            .filter(|i| i.cart_id == cart_id)
            .cloned()
            .collect())
    }

    async fn update_cart_item(&self, mut item: CartItem) -> Result<CartItem> {
        let mut state = self.state.write().await;
        if !state.cart_items.contains_key(&item.id.as_i64()) {
            return Err(StoreError::MissingRow {
                entity: "cart_items",
                id: item.id.as_i64(),
            });
        }
        item.updated_at = Some(Utc::now());
        state.cart_items.insert(item.id.as_i64(), item.clone());
        Ok(item)
    }

    async fn delete_cart_item(&self, id: CartItemId) -> Result<bool> {
        Ok(self
            .state
            .write()
            .await
            .cart_items
            .remove(&id.as_i64())
            .is_some())
    }

    async fn delete_cart_item_by_product(
        &self,
        cart_id: CartId,
        product_id: ProductId,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let id = state
            .cart_items
            .values()
            .find(|i| i.cart_id == cart_id && i.product_id == product_id)
            .map(|i| i.id.as_i64());
        Ok(id.is_some_and(|id| state.cart_items.remove(&id).is_some()))
    }

    async fn clear_cart_items(&self, cart_id: CartId) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.cart_items.len();
        state.cart_items.retain(|_, item| item.cart_id != cart_id);
        Ok((before - state.cart_items.len()) as u64)
    }

    async fn apply_cart_merge(
        &self,
        user_cart_id: CartId,
        session_cart_id: CartId,
        merged: Vec<CartItem>,
    ) -> Result<()> {
        let mut state = self.state.write().await;

        let Some(session_cart) = state.carts.get(&session_cart_id.as_i64()).cloned() else {
            return Err(StoreError::MissingRow {
                entity: "carts",
                id: session_cart_id.as_i64(),
            });
        };
        if !state.carts.contains_key(&user_cart_id.as_i64()) {
            return Err(StoreError::MissingRow {
                entity: "carts",
                id: user_cart_id.as_i64(),
            });
        }

        for mut item in merged {
            let existing = state
                .cart_items
                .values()
                .find(|i| i.cart_id == user_cart_id && i.product_id == item.product_id)
                .cloned();
            match existing {
                Some(mut row) => {
                    // keep the stored unit price; only the quantity changes
                    row.quantity = item.quantity;
                    row.updated_at = Some(Utc::now());
                    state.cart_items.insert(row.id.as_i64(), row);
                }
                None => {
                    item.cart_id = user_cart_id;
                    item.id = CartItemId::new(state.next_id());
                    state.cart_items.insert(item.id.as_i64(), item);
                }
            }
        }

        let mut session_cart = session_cart;
        session_cart.is_active = false;
        session_cart.updated_at = Some(Utc::now());
        state
            .carts
            .insert(session_cart.id.as_i64(), session_cart);
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(
        &self,
        mut order: Order,
        items: Vec<OrderItem>,
    ) -> Result<(Order, Vec<OrderItem>)> {
        let mut state = self.state.write().await;
        if state
            .orders
            .values()
            .any(|o| o.order_number == order.order_number)
        {
            return Err(StoreError::UniqueViolation {
                entity: "orders",
                field: "order_number",
            });
        }
        order.id = OrderId::new(state.next_id());
        state.orders.insert(order.id.as_i64(), order.clone());

        let mut stored_items = Vec::with_capacity(items.len());
        for mut item in items {
            item.order_id = order.id;
            item.id = OrderItemId::new(state.next_id());
            state.order_items.insert(item.id.as_i64(), item.clone());
            stored_items.push(item);
        }
        Ok((order, stored_items))
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id.as_i64()).cloned())
    }

    async fn get_order_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .find(|o| o.order_number == order_number)
            .cloned())
    }

    async fn list_order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let state = self.state.read().await;
        Ok(state
            .order_items
            .values()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn list_orders_by_user(
        &self,
        user_id: UserId,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut rows: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(rows.into_iter(), skip, limit))
    }

    async fn list_orders_by_status(
        &self,
        status: OrderStatus,
        user_id: Option<UserId>,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut rows: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.status == status)
            .filter(|o| user_id.is_none_or(|uid| o.user_id == uid))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(rows.into_iter(), skip, limit))
    }

    async fn update_order(&self, mut order: Order) -> Result<Order> {
        let mut state = self.state.write().await;
        if !state.orders.contains_key(&order.id.as_i64()) {
            return Err(StoreError::MissingRow {
                entity: "orders",
                id: order.id.as_i64(),
            });
        }
        order.updated_at = Some(Utc::now());
        state.orders.insert(order.id.as_i64(), order.clone());
        Ok(order)
    }
}
