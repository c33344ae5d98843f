//! PostgreSQL-backed store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow, Postgres};
use sqlx::{QueryBuilder, Row};

use common::{
    Cart, CartId, CartItem, CartItemId, CartOwner, Category, CategoryId, Order, OrderId,
    OrderItem, OrderItemId, OrderStatus, PaymentStatus, Product, ProductId, ProductSearch,
    SortOrder, StockOperation, User, UserId,
};

use crate::traits::{CartStore, CategoryStore, OrderStore, ProductStore, UserStore};
use crate::{Result, StoreError};

/// PostgreSQL store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store around an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

/// Maps a unique-constraint violation to [`StoreError::UniqueViolation`],
/// using the constraint name to identify the offending field.
fn map_insert_err(
    e: sqlx::Error,
    entity: &'static str,
    constraints: &[(&'static str, &'static str)],
) -> StoreError {
    if let sqlx::Error::Database(ref db) = e
        && db.is_unique_violation()
    {
        let field = db
            .constraint()
            .and_then(|name| {
                constraints
                    .iter()
                    .find(|(c, _)| *c == name)
                    .map(|(_, field)| *field)
            })
            .unwrap_or("unknown");
        return StoreError::UniqueViolation { entity, field };
    }
    StoreError::Database(e)
}

fn to_u32(value: i32, field: &'static str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::Decode(format!("negative value in {field}")))
}

fn row_to_user(row: &PgRow) -> Result<User> {
    Ok(User {
        id: UserId::new(row.try_get("id")?),
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        hashed_password: row.try_get("hashed_password")?,
        is_active: row.try_get("is_active")?,
        is_superuser: row.try_get("is_superuser")?,
        phone: row.try_get("phone")?,
        address: row.try_get("address")?,
        city: row.try_get("city")?,
        country: row.try_get("country")?,
        postal_code: row.try_get("postal_code")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_category(row: &PgRow) -> Result<Category> {
    Ok(Category {
        id: CategoryId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        description: row.try_get("description")?,
        image_url: row.try_get("image_url")?,
        is_active: row.try_get("is_active")?,
        parent_id: row
            .try_get::<Option<i64>, _>("parent_id")?
            .map(CategoryId::new),
        sort_order: row.try_get("sort_order")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_product(row: &PgRow) -> Result<Product> {
    let images: Option<serde_json::Value> = row.try_get("images")?;
    let images = images
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| StoreError::Decode(format!("bad images json: {e}")))?
        .unwrap_or_default();

    Ok(Product {
        id: ProductId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        short_description: row.try_get("short_description")?,
        slug: row.try_get("slug")?,
        sku: row.try_get("sku")?,
        price: common::Money::from_cents(row.try_get("price")?),
        sale_price: row
            .try_get::<Option<i64>, _>("sale_price")?
            .map(common::Money::from_cents),
        cost_price: row
            .try_get::<Option<i64>, _>("cost_price")?
            .map(common::Money::from_cents),
        stock_quantity: to_u32(row.try_get("stock_quantity")?, "stock_quantity")?,
        min_stock_level: to_u32(row.try_get("min_stock_level")?, "min_stock_level")?,
        is_active: row.try_get("is_active")?,
        is_featured: row.try_get("is_featured")?,
        images,
        attributes: row.try_get("attributes")?,
        category_id: CategoryId::new(row.try_get("category_id")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_cart(row: &PgRow) -> Result<Cart> {
    Ok(Cart {
        id: CartId::new(row.try_get("id")?),
        user_id: row.try_get::<Option<i64>, _>("user_id")?.map(UserId::new),
        session_id: row.try_get("session_id")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_cart_item(row: &PgRow) -> Result<CartItem> {
    Ok(CartItem {
        id: CartItemId::new(row.try_get("id")?),
        cart_id: CartId::new(row.try_get("cart_id")?),
        product_id: ProductId::new(row.try_get("product_id")?),
        quantity: to_u32(row.try_get("quantity")?, "quantity")?,
        unit_price: common::Money::from_cents(row.try_get("unit_price")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_order(row: &PgRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    let payment_status: String = row.try_get("payment_status")?;
    Ok(Order {
        id: OrderId::new(row.try_get("id")?),
        order_number: row.try_get("order_number")?,
        user_id: UserId::new(row.try_get("user_id")?),
        status: OrderStatus::parse(&status)
            .ok_or_else(|| StoreError::Decode(format!("unknown order status {status:?}")))?,
        payment_status: PaymentStatus::parse(&payment_status).ok_or_else(|| {
            StoreError::Decode(format!("unknown payment status {payment_status:?}"))
        })?,
        subtotal: common::Money::from_cents(row.try_get("subtotal")?),
        tax_amount: common::Money::from_cents(row.try_get("tax_amount")?),
        shipping_cost: common::Money::from_cents(row.try_get("shipping_cost")?),
        discount_amount: common::Money::from_cents(row.try_get("discount_amount")?),
        total_amount: common::Money::from_cents(row.try_get("total_amount")?),
        shipping_address: row.try_get("shipping_address")?,
        shipping_city: row.try_get("shipping_city")?,
        shipping_country: row.try_get("shipping_country")?,
        shipping_postal_code: row.try_get("shipping_postal_code")?,
        shipping_phone: row.try_get("shipping_phone")?,
        billing_address: row.try_get("billing_address")?,
        billing_city: row.try_get("billing_city")?,
        billing_country: row.try_get("billing_country")?,
        billing_postal_code: row.try_get("billing_postal_code")?,
        notes: row.try_get("notes")?,
        tracking_number: row.try_get("tracking_number")?,
        payment_method: row.try_get("payment_method")?,
        payment_reference: row.try_get("payment_reference")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        shipped_at: row.try_get("shipped_at")?,
        delivered_at: row.try_get("delivered_at")?,
    })
}

fn row_to_order_item(row: &PgRow) -> Result<OrderItem> {
    Ok(OrderItem {
        id: OrderItemId::new(row.try_get("id")?),
        order_id: OrderId::new(row.try_get("order_id")?),
        product_id: ProductId::new(row.try_get("product_id")?),
        product_name: row.try_get("product_name")?,
        product_sku: row.try_get("product_sku")?,
        quantity: to_u32(row.try_get("quantity")?, "quantity")?,
        unit_price: common::Money::from_cents(row.try_get("unit_price")?),
        total_price: common::Money::from_cents(row.try_get("total_price")?),
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn insert_user(&self, mut user: User) -> Result<User> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (email, username, first_name, last_name, hashed_password,
                               is_active, is_superuser, phone, address, city, country,
                               postal_code, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            "#,
        )
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.hashed_password)
        .bind(user.is_active)
        .bind(user.is_superuser)
        .bind(&user.phone)
        .bind(&user.address)
        .bind(&user.city)
        .bind(&user.country)
        .bind(&user.postal_code)
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            map_insert_err(
                e,
                "users",
                &[
                    ("users_email_key", "email"),
                    ("users_username_key", "username"),
                ],
            )
        })?;

        user.id = UserId::new(row.try_get("id")?);
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row_to_user(&row))
            .transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        sqlx::query("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row_to_user(&row))
            .transpose()
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        sqlx::query("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row_to_user(&row))
            .transpose()
    }

    async fn list_users(&self, skip: u64, limit: u64) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY id OFFSET $1 LIMIT $2")
            .bind(skip as i64)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_user).collect()
    }

    async fn update_user(&self, mut user: User) -> Result<User> {
        let row = sqlx::query(
            r#"
            UPDATE users
            SET email = $2, username = $3, first_name = $4, last_name = $5,
                hashed_password = $6, is_active = $7, is_superuser = $8, phone = $9,
                address = $10, city = $11, country = $12, postal_code = $13,
                updated_at = now()
            WHERE id = $1
            RETURNING updated_at
            "#,
        )
        .bind(user.id.as_i64())
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.hashed_password)
        .bind(user.is_active)
        .bind(user.is_superuser)
        .bind(&user.phone)
        .bind(&user.address)
        .bind(&user.city)
        .bind(&user.country)
        .bind(&user.postal_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            map_insert_err(
                e,
                "users",
                &[
                    ("users_email_key", "email"),
                    ("users_username_key", "username"),
                ],
            )
        })?
        .ok_or(StoreError::MissingRow {
            entity: "users",
            id: user.id.as_i64(),
        })?;

        user.updated_at = row.try_get("updated_at")?;
        Ok(user)
    }

    async fn delete_user(&self, id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CategoryStore for PostgresStore {
    async fn insert_category(&self, mut category: Category) -> Result<Category> {
        let row = sqlx::query(
            r#"
            INSERT INTO categories (name, slug, description, image_url, is_active,
                                    parent_id, sort_order, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&category.name)
        .bind(&category.slug)
        .bind(&category.description)
        .bind(&category.image_url)
        .bind(category.is_active)
        .bind(category.parent_id.map(|p| p.as_i64()))
        .bind(category.sort_order)
        .bind(category.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            map_insert_err(
                e,
                "categories",
                &[
                    ("categories_name_key", "name"),
                    ("categories_slug_key", "slug"),
                ],
            )
        })?;

        category.id = CategoryId::new(row.try_get("id")?);
        Ok(category)
    }

    async fn get_category(&self, id: CategoryId) -> Result<Option<Category>> {
        sqlx::query("SELECT * FROM categories WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row_to_category(&row))
            .transpose()
    }

    async fn get_category_by_name(&self, name: &str) -> Result<Option<Category>> {
        sqlx::query("SELECT * FROM categories WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row_to_category(&row))
            .transpose()
    }

    async fn get_category_by_slug(&self, slug: &str) -> Result<Option<Category>> {
        sqlx::query("SELECT * FROM categories WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row_to_category(&row))
            .transpose()
    }

    async fn list_categories(
        &self,
        parent: Option<Option<CategoryId>>,
        active_only: bool,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Category>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM categories WHERE TRUE");
        match parent {
            None => {}
            Some(None) => {
                qb.push(" AND parent_id IS NULL");
            }
            Some(Some(parent_id)) => {
                qb.push(" AND parent_id = ");
                qb.push_bind(parent_id.as_i64());
            }
        }
        if active_only {
            qb.push(" AND is_active");
        }
        qb.push(" ORDER BY sort_order, id OFFSET ");
        qb.push_bind(skip as i64);
        qb.push(" LIMIT ");
        qb.push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_category).collect()
    }

    async fn update_category(&self, mut category: Category) -> Result<Category> {
        let row = sqlx::query(
            r#"
            UPDATE categories
            SET name = $2, slug = $3, description = $4, image_url = $5, is_active = $6,
                parent_id = $7, sort_order = $8, updated_at = now()
            WHERE id = $1
            RETURNING updated_at
            "#,
        )
        .bind(category.id.as_i64())
        .bind(&category.name)
        .bind(&category.slug)
        .bind(&category.description)
        .bind(&category.image_url)
        .bind(category.is_active)
        .bind(category.parent_id.map(|p| p.as_i64()))
        .bind(category.sort_order)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            map_insert_err(
                e,
                "categories",
                &[
                    ("categories_name_key", "name"),
                    ("categories_slug_key", "slug"),
                ],
            )
        })?
        .ok_or(StoreError::MissingRow {
            entity: "categories",
            id: category.id.as_i64(),
        })?;

        category.updated_at = row.try_get("updated_at")?;
        Ok(category)
    }

    async fn delete_category(&self, id: CategoryId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_categories(&self, active_only: bool) -> Result<u64> {
        let count: i64 = if active_only {
            sqlx::query_scalar("SELECT COUNT(*) FROM categories WHERE is_active")
                .fetch_one(&self.pool)
                .await?
        } else {
            sqlx::query_scalar("SELECT COUNT(*) FROM categories")
                .fetch_one(&self.pool)
                .await?
        };
        Ok(count as u64)
    }
}

#[async_trait]
impl ProductStore for PostgresStore {
    async fn insert_product(&self, mut product: Product) -> Result<Product> {
        let images = serde_json::to_value(&product.images)
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let row = sqlx::query(
            r#"
            INSERT INTO products (name, description, short_description, slug, sku, price,
                                  sale_price, cost_price, stock_quantity, min_stock_level,
                                  is_active, is_featured, images, attributes, category_id,
                                  created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING id
            "#,
        )
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.short_description)
        .bind(&product.slug)
        .bind(&product.sku)
        .bind(product.price.cents())
        .bind(product.sale_price.map(|m| m.cents()))
        .bind(product.cost_price.map(|m| m.cents()))
        .bind(product.stock_quantity as i32)
        .bind(product.min_stock_level as i32)
        .bind(product.is_active)
        .bind(product.is_featured)
        .bind(images)
        .bind(&product.attributes)
        .bind(product.category_id.as_i64())
        .bind(product.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            map_insert_err(
                e,
                "products",
                &[("products_sku_key", "sku"), ("products_slug_key", "slug")],
            )
        })?;

        product.id = ProductId::new(row.try_get("id")?);
        Ok(product)
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        sqlx::query("SELECT * FROM products WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row_to_product(&row))
            .transpose()
    }

    async fn get_product_by_sku(&self, sku: &str) -> Result<Option<Product>> {
        sqlx::query("SELECT * FROM products WHERE sku = $1")
            .bind(sku)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row_to_product(&row))
            .transpose()
    }

    async fn get_product_by_slug(&self, slug: &str) -> Result<Option<Product>> {
        sqlx::query("SELECT * FROM products WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row_to_product(&row))
            .transpose()
    }

    async fn list_products_by_category(
        &self,
        category_id: CategoryId,
        active_only: bool,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Product>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM products WHERE category_id = ");
        qb.push_bind(category_id.as_i64());
        if active_only {
            qb.push(" AND is_active");
        }
        qb.push(" ORDER BY id OFFSET ");
        qb.push_bind(skip as i64);
        qb.push(" LIMIT ");
        qb.push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_product).collect()
    }

    async fn search_products(
        &self,
        search: &ProductSearch,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Product>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM products WHERE TRUE");

        if let Some(ref q) = search.query {
            let pattern = format!("%{q}%");
            qb.push(" AND (name ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR description ILIKE ");
            qb.push_bind(pattern.clone());
            qb.push(" OR sku ILIKE ");
            qb.push_bind(pattern);
            qb.push(")");
        }
        if let Some(category_id) = search.category_id {
            qb.push(" AND category_id = ");
            qb.push_bind(category_id.as_i64());
        }
        if let Some(min) = search.min_price {
            qb.push(" AND price >= ");
            qb.push_bind(min.cents());
        }
        if let Some(max) = search.max_price {
            qb.push(" AND price <= ");
            qb.push_bind(max.cents());
        }
        if let Some(featured) = search.is_featured {
            qb.push(" AND is_featured = ");
            qb.push_bind(featured);
        }
        if let Some(in_stock) = search.in_stock {
            if in_stock {
                qb.push(" AND stock_quantity > 0");
            } else {
                qb.push(" AND stock_quantity <= 0");
            }
        }
        if let Some(field) = search.sort_by {
            // field comes from the closed allow-list, safe to interpolate
            qb.push(" ORDER BY ");
            qb.push(field.column());
            qb.push(match search.sort_order {
                SortOrder::Asc => " ASC",
                SortOrder::Desc => " DESC",
            });
        }
        qb.push(" OFFSET ");
        qb.push_bind(skip as i64);
        qb.push(" LIMIT ");
        qb.push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_product).collect()
    }

    async fn list_featured(&self, skip: u64, limit: u64) -> Result<Vec<Product>> {
        let rows = sqlx::query(
            "SELECT * FROM products WHERE is_featured AND is_active ORDER BY id OFFSET $1 LIMIT $2",
        )
        .bind(skip as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_product).collect()
    }

    async fn list_low_stock(&self, skip: u64, limit: u64) -> Result<Vec<Product>> {
        let rows = sqlx::query(
            "SELECT * FROM products WHERE stock_quantity <= min_stock_level ORDER BY id OFFSET $1 LIMIT $2",
        )
        .bind(skip as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_product).collect()
    }

    async fn update_product(&self, mut product: Product) -> Result<Product> {
        let images = serde_json::to_value(&product.images)
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        // stock_quantity is deliberately absent: stock moves only through update_stock
        let row = sqlx::query(
            r#"
            UPDATE products
            SET name = $2, description = $3, short_description = $4, slug = $5, sku = $6,
                price = $7, sale_price = $8, cost_price = $9, min_stock_level = $10,
                is_active = $11, is_featured = $12, images = $13, attributes = $14,
                category_id = $15, updated_at = now()
            WHERE id = $1
            RETURNING stock_quantity, updated_at
            "#,
        )
        .bind(product.id.as_i64())
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.short_description)
        .bind(&product.slug)
        .bind(&product.sku)
        .bind(product.price.cents())
        .bind(product.sale_price.map(|m| m.cents()))
        .bind(product.cost_price.map(|m| m.cents()))
        .bind(product.min_stock_level as i32)
        .bind(product.is_active)
        .bind(product.is_featured)
        .bind(images)
        .bind(&product.attributes)
        .bind(product.category_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            map_insert_err(
                e,
                "products",
                &[("products_sku_key", "sku"), ("products_slug_key", "slug")],
            )
        })?
        .ok_or(StoreError::MissingRow {
            entity: "products",
            id: product.id.as_i64(),
        })?;

        product.stock_quantity = to_u32(row.try_get("stock_quantity")?, "stock_quantity")?;
        product.updated_at = row.try_get("updated_at")?;
        Ok(product)
    }

    async fn update_stock(
        &self,
        id: ProductId,
        quantity: u32,
        operation: StockOperation,
    ) -> Result<Option<Product>> {
        let sql = match operation {
            StockOperation::Add => {
                "UPDATE products SET stock_quantity = stock_quantity + $2, updated_at = now() \
                 WHERE id = $1 RETURNING *"
            }
            StockOperation::Subtract => {
                "UPDATE products SET stock_quantity = GREATEST(0, stock_quantity - $2), \
                 updated_at = now() WHERE id = $1 RETURNING *"
            }
            StockOperation::Set => {
                "UPDATE products SET stock_quantity = GREATEST(0, $2), updated_at = now() \
                 WHERE id = $1 RETURNING *"
            }
        };
        sqlx::query(sql)
            .bind(id.as_i64())
            .bind(quantity as i32)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row_to_product(&row))
            .transpose()
    }

    async fn count_products_in_category(&self, category_id: CategoryId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE category_id = $1")
            .bind(category_id.as_i64())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl CartStore for PostgresStore {
    async fn insert_cart(&self, mut cart: Cart) -> Result<Cart> {
        let row = sqlx::query(
            r#"
            INSERT INTO carts (user_id, session_id, is_active, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(cart.user_id.map(|u| u.as_i64()))
        .bind(&cart.session_id)
        .bind(cart.is_active)
        .bind(cart.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            map_insert_err(
                e,
                "carts",
                &[
                    ("carts_one_active_per_user", "owner"),
                    ("carts_one_active_per_session", "owner"),
                ],
            )
        })?;

        cart.id = CartId::new(row.try_get("id")?);
        Ok(cart)
    }

    async fn get_cart(&self, id: CartId) -> Result<Option<Cart>> {
        sqlx::query("SELECT * FROM carts WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row_to_cart(&row))
            .transpose()
    }

    async fn get_active_cart(&self, owner: &CartOwner) -> Result<Option<Cart>> {
        let row = match owner {
            CartOwner::User(user_id) => {
                sqlx::query("SELECT * FROM carts WHERE user_id = $1 AND is_active")
                    .bind(user_id.as_i64())
                    .fetch_optional(&self.pool)
                    .await?
            }
            CartOwner::Session(session_id) => {
                sqlx::query("SELECT * FROM carts WHERE session_id = $1 AND is_active")
                    .bind(session_id)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };
        row.map(|row| row_to_cart(&row)).transpose()
    }

    async fn update_cart(&self, mut cart: Cart) -> Result<Cart> {
        let row = sqlx::query(
            "UPDATE carts SET is_active = $2, updated_at = now() WHERE id = $1 \
             RETURNING updated_at",
        )
        .bind(cart.id.as_i64())
        .bind(cart.is_active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::MissingRow {
            entity: "carts",
            id: cart.id.as_i64(),
        })?;

        cart.updated_at = row.try_get("updated_at")?;
        Ok(cart)
    }

    async fn delete_cart(&self, id: CartId) -> Result<bool> {
        // cart_items has ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM carts WHERE id = $1")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_inactive_carts_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Cart>> {
        let rows = sqlx::query(
            "SELECT * FROM carts WHERE NOT is_active \
             AND COALESCE(updated_at, created_at) < $1 ORDER BY id LIMIT $2",
        )
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_cart).collect()
    }

    async fn insert_cart_item(&self, mut item: CartItem) -> Result<CartItem> {
        let row = sqlx::query(
            r#"
            INSERT INTO cart_items (cart_id, product_id, quantity, unit_price, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(item.cart_id.as_i64())
        .bind(item.product_id.as_i64())
        .bind(item.quantity as i32)
        .bind(item.unit_price.cents())
        .bind(item.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            map_insert_err(
                e,
                "cart_items",
                &[("cart_items_cart_product_key", "cart_id_product_id")],
            )
        })?;

        item.id = CartItemId::new(row.try_get("id")?);
        Ok(item)
    }

    async fn get_cart_item(&self, id: CartItemId) -> Result<Option<CartItem>> {
        sqlx::query("SELECT * FROM cart_items WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row_to_cart_item(&row))
            .transpose()
    }

    async fn get_cart_item_by_product(
        &self,
        cart_id: CartId,
        product_id: ProductId,
    ) -> Result<Option<CartItem>> {
        sqlx::query("SELECT * FROM cart_items WHERE cart_id = $1 AND product_id = $2")
            .bind(cart_id.as_i64())
            .bind(product_id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row_to_cart_item(&row))
            .transpose()
    }

    async fn list_cart_items(&self, cart_id: CartId) -> Result<Vec<CartItem>> {
        let rows = sqlx::query("SELECT * FROM cart_items WHERE cart_id = $1 ORDER BY id")
            .bind(cart_id.as_i64())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_cart_item).collect()
    }

    async fn update_cart_item(&self, mut item: CartItem) -> Result<CartItem> {
        let row = sqlx::query(
            "UPDATE cart_items SET quantity = $2, unit_price = $3, updated_at = now() \
             WHERE id = $1 RETURNING updated_at",
        )
        .bind(item.id.as_i64())
        .bind(item.quantity as i32)
        .bind(item.unit_price.cents())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::MissingRow {
            entity: "cart_items",
            id: item.id.as_i64(),
        })?;

        item.updated_at = row.try_get("updated_at")?;
        Ok(item)
    }

    async fn delete_cart_item(&self, id: CartItemId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cart_items WHERE id = $1")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_cart_item_by_product(
        &self,
        cart_id: CartId,
        product_id: ProductId,
    ) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cart_items WHERE cart_id = $1 AND product_id = $2")
            .bind(cart_id.as_i64())
            .bind(product_id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_cart_items(&self, cart_id: CartId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id.as_i64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn apply_cart_merge(
        &self,
        user_cart_id: CartId,
        session_cart_id: CartId,
        merged: Vec<CartItem>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for item in &merged {
            // an existing (cart, product) row keeps its stored unit price
            sqlx::query(
                r#"
                INSERT INTO cart_items (cart_id, product_id, quantity, unit_price, created_at)
                VALUES ($1, $2, $3, $4, now())
                ON CONFLICT (cart_id, product_id)
                DO UPDATE SET quantity = EXCLUDED.quantity, updated_at = now()
                "#,
            )
            .bind(user_cart_id.as_i64())
            .bind(item.product_id.as_i64())
            .bind(item.quantity as i32)
            .bind(item.unit_price.cents())
            .execute(&mut *tx)
            .await?;
        }

        let result =
            sqlx::query("UPDATE carts SET is_active = FALSE, updated_at = now() WHERE id = $1")
                .bind(session_cart_id.as_i64())
                .execute(&mut *tx)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::MissingRow {
                entity: "carts",
                id: session_cart_id.as_i64(),
            });
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn insert_order(
        &self,
        mut order: Order,
        mut items: Vec<OrderItem>,
    ) -> Result<(Order, Vec<OrderItem>)> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO orders (order_number, user_id, status, payment_status, subtotal,
                                tax_amount, shipping_cost, discount_amount, total_amount,
                                shipping_address, shipping_city, shipping_country,
                                shipping_postal_code, shipping_phone, billing_address,
                                billing_city, billing_country, billing_postal_code, notes,
                                tracking_number, payment_method, payment_reference,
                                created_at, shipped_at, delivered_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23, $24, $25)
            RETURNING id
            "#,
        )
        .bind(&order.order_number)
        .bind(order.user_id.as_i64())
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.subtotal.cents())
        .bind(order.tax_amount.cents())
        .bind(order.shipping_cost.cents())
        .bind(order.discount_amount.cents())
        .bind(order.total_amount.cents())
        .bind(&order.shipping_address)
        .bind(&order.shipping_city)
        .bind(&order.shipping_country)
        .bind(&order.shipping_postal_code)
        .bind(&order.shipping_phone)
        .bind(&order.billing_address)
        .bind(&order.billing_city)
        .bind(&order.billing_country)
        .bind(&order.billing_postal_code)
        .bind(&order.notes)
        .bind(&order.tracking_number)
        .bind(&order.payment_method)
        .bind(&order.payment_reference)
        .bind(order.created_at)
        .bind(order.shipped_at)
        .bind(order.delivered_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            map_insert_err(
                e,
                "orders",
                &[("orders_order_number_key", "order_number")],
            )
        })?;

        order.id = OrderId::new(row.try_get("id")?);

        for item in &mut items {
            item.order_id = order.id;
            let row = sqlx::query(
                r#"
                INSERT INTO order_items (order_id, product_id, product_name, product_sku,
                                         quantity, unit_price, total_price, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING id
                "#,
            )
            .bind(item.order_id.as_i64())
            .bind(item.product_id.as_i64())
            .bind(&item.product_name)
            .bind(&item.product_sku)
            .bind(item.quantity as i32)
            .bind(item.unit_price.cents())
            .bind(item.total_price.cents())
            .bind(item.created_at)
            .fetch_one(&mut *tx)
            .await?;
            item.id = OrderItemId::new(row.try_get("id")?);
        }

        tx.commit().await?;
        Ok((order, items))
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row_to_order(&row))
            .transpose()
    }

    async fn get_order_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        sqlx::query("SELECT * FROM orders WHERE order_number = $1")
            .bind(order_number)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| row_to_order(&row))
            .transpose()
    }

    async fn list_order_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>> {
        let rows = sqlx::query("SELECT * FROM order_items WHERE order_id = $1 ORDER BY id")
            .bind(order_id.as_i64())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_order_item).collect()
    }

    async fn list_orders_by_user(
        &self,
        user_id: UserId,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            "SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC OFFSET $2 LIMIT $3",
        )
        .bind(user_id.as_i64())
        .bind(skip as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_order).collect()
    }

    async fn list_orders_by_status(
        &self,
        status: OrderStatus,
        user_id: Option<UserId>,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Order>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM orders WHERE status = ");
        qb.push_bind(status.as_str());
        if let Some(user_id) = user_id {
            qb.push(" AND user_id = ");
            qb.push_bind(user_id.as_i64());
        }
        qb.push(" ORDER BY created_at DESC OFFSET ");
        qb.push_bind(skip as i64);
        qb.push(" LIMIT ");
        qb.push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_order).collect()
    }

    async fn update_order(&self, mut order: Order) -> Result<Order> {
        let row = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, payment_status = $3, notes = $4, tracking_number = $5,
                payment_reference = $6, shipped_at = $7, delivered_at = $8, updated_at = now()
            WHERE id = $1
            RETURNING updated_at
            "#,
        )
        .bind(order.id.as_i64())
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(&order.notes)
        .bind(&order.tracking_number)
        .bind(&order.payment_reference)
        .bind(order.shipped_at)
        .bind(order.delivered_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::MissingRow {
            entity: "orders",
            id: order.id.as_i64(),
        })?;

        order.updated_at = row.try_get("updated_at")?;
        Ok(order)
    }
}
