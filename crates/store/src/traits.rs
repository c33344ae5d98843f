//! Narrow per-entity repository traits.
//!
//! Each domain engine depends only on the traits it needs. Insert methods
//! assign the entity id (autoincrement semantics) and return the stored row;
//! update methods set `updated_at` and fail with [`StoreError::MissingRow`]
//! when the id does not resolve. Multi-row operations that must be atomic
//! ([`OrderStore::insert_order`], [`CartStore::apply_cart_merge`]) are single
//! trait methods so each backend can run them in one unit of work.
//!
//! [`StoreError::MissingRow`]: crate::StoreError::MissingRow

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::{
    Cart, CartId, CartItem, CartItemId, CartOwner, Category, CategoryId, Order, OrderId,
    OrderItem, OrderStatus, Product, ProductId, ProductSearch, StockOperation, User, UserId,
};

use crate::Result;

/// User account persistence.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts a user, enforcing email and username uniqueness.
    async fn insert_user(&self, user: User) -> Result<User>;
    async fn get_user(&self, id: UserId) -> Result<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn list_users(&self, skip: u64, limit: u64) -> Result<Vec<User>>;
    async fn update_user(&self, user: User) -> Result<User>;
    async fn delete_user(&self, id: UserId) -> Result<bool>;
}

/// Category persistence.
#[async_trait]
pub trait CategoryStore: Send + Sync {
    /// Inserts a category, enforcing name and slug uniqueness.
    async fn insert_category(&self, category: Category) -> Result<Category>;
    async fn get_category(&self, id: CategoryId) -> Result<Option<Category>>;
    async fn get_category_by_name(&self, name: &str) -> Result<Option<Category>>;
    async fn get_category_by_slug(&self, slug: &str) -> Result<Option<Category>>;

    /// Lists categories ordered by `sort_order`.
    ///
    /// `parent` selects: `None` — any; `Some(None)` — roots only;
    /// `Some(Some(id))` — direct children of `id`.
    async fn list_categories(
        &self,
        parent: Option<Option<CategoryId>>,
        active_only: bool,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Category>>;

    async fn update_category(&self, category: Category) -> Result<Category>;

    /// Deletes the row only; children and products are not cascaded.
    async fn delete_category(&self, id: CategoryId) -> Result<bool>;

    async fn count_categories(&self, active_only: bool) -> Result<u64>;
}

/// Product persistence, including the stock ledger primitive.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Inserts a product, enforcing SKU and slug uniqueness.
    async fn insert_product(&self, product: Product) -> Result<Product>;
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;
    async fn get_product_by_sku(&self, sku: &str) -> Result<Option<Product>>;
    async fn get_product_by_slug(&self, slug: &str) -> Result<Option<Product>>;

    async fn list_products_by_category(
        &self,
        category_id: CategoryId,
        active_only: bool,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Product>>;

    /// Applies the conjunctive search filters; the sort field is already
    /// validated against the closed allow-list by the caller.
    async fn search_products(
        &self,
        search: &ProductSearch,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Product>>;

    async fn list_featured(&self, skip: u64, limit: u64) -> Result<Vec<Product>>;

    /// Products at or below their low-stock threshold.
    async fn list_low_stock(&self, skip: u64, limit: u64) -> Result<Vec<Product>>;

    /// Updates catalog fields. `stock_quantity` is preserved as stored;
    /// stock moves only through [`ProductStore::update_stock`].
    async fn update_product(&self, product: Product) -> Result<Product>;

    /// Applies a stock ledger operation atomically and returns the updated
    /// row, or `None` if the product id does not resolve. `Subtract` and
    /// `Set` floor at zero; no sufficiency check happens at this layer.
    async fn update_stock(
        &self,
        id: ProductId,
        quantity: u32,
        operation: StockOperation,
    ) -> Result<Option<Product>>;

    async fn count_products_in_category(&self, category_id: CategoryId) -> Result<u64>;
}

/// Cart and cart-item persistence.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Inserts a cart, enforcing at most one active cart per owner key.
    async fn insert_cart(&self, cart: Cart) -> Result<Cart>;
    async fn get_cart(&self, id: CartId) -> Result<Option<Cart>>;
    async fn get_active_cart(&self, owner: &CartOwner) -> Result<Option<Cart>>;
    async fn update_cart(&self, cart: Cart) -> Result<Cart>;

    /// Deletes a cart and all of its items.
    async fn delete_cart(&self, id: CartId) -> Result<bool>;

    /// Inactive carts last touched before `cutoff`, for the retention sweep.
    async fn list_inactive_carts_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Cart>>;

    /// Inserts an item, enforcing the (cart, product) unique pair.
    async fn insert_cart_item(&self, item: CartItem) -> Result<CartItem>;
    async fn get_cart_item(&self, id: CartItemId) -> Result<Option<CartItem>>;
    async fn get_cart_item_by_product(
        &self,
        cart_id: CartId,
        product_id: ProductId,
    ) -> Result<Option<CartItem>>;
    async fn list_cart_items(&self, cart_id: CartId) -> Result<Vec<CartItem>>;
    async fn update_cart_item(&self, item: CartItem) -> Result<CartItem>;
    async fn delete_cart_item(&self, id: CartItemId) -> Result<bool>;
    async fn delete_cart_item_by_product(
        &self,
        cart_id: CartId,
        product_id: ProductId,
    ) -> Result<bool>;

    /// Removes every item from the cart, returning the number deleted.
    async fn clear_cart_items(&self, cart_id: CartId) -> Result<u64>;

    /// Applies a computed cart merge in one unit of work: upserts `merged`
    /// rows into the user cart (an existing (cart, product) row keeps its
    /// stored unit price, only the quantity changes) and deactivates the
    /// session cart. All-or-nothing.
    async fn apply_cart_merge(
        &self,
        user_cart_id: CartId,
        session_cart_id: CartId,
        merged: Vec<CartItem>,
    ) -> Result<()>;
}

/// Order persistence.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts an order together with its items in one unit of work,
    /// enforcing order-number uniqueness. Either everything commits or
    /// nothing does.
    async fn insert_order(
        &self,
        order: Order,
        items: Vec<OrderItem>,
    ) -> Result<(Order, Vec<OrderItem>)>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;
    async fn get_order_by_number(&self, order_number: &str) -> Result<Option<Order>>;
    async fn list_order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>>;
    async fn list_orders_by_user(
        &self,
        user_id: UserId,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Order>>;
    async fn list_orders_by_status(
        &self,
        status: OrderStatus,
        user_id: Option<UserId>,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Order>>;
    async fn update_order(&self, order: Order) -> Result<Order>;
}
