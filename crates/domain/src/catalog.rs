//! Product catalog service and stock ledger orchestration.

use chrono::Utc;
use common::{CategoryId, Money, Product, ProductId, ProductSearch, StockOperation};
use store::{CategoryStore, ProductStore};

use crate::error::{DomainError, Result};

/// Fields for creating a product.
#[derive(Debug, Clone)]
pub struct ProductCreate {
    pub name: String,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub slug: String,
    pub sku: String,
    pub price: Money,
    pub sale_price: Option<Money>,
    pub cost_price: Option<Money>,
    pub stock_quantity: u32,
    pub min_stock_level: u32,
    pub is_featured: bool,
    pub images: Vec<String>,
    pub attributes: Option<serde_json::Value>,
    pub category_id: CategoryId,
}

/// Partial update of a product. `None` fields are left unchanged; the
/// double-`Option` fields can be cleared with `Some(None)`.
#[derive(Debug, Clone, Default)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub slug: Option<String>,
    pub sku: Option<String>,
    pub price: Option<Money>,
    pub sale_price: Option<Option<Money>>,
    pub cost_price: Option<Option<Money>>,
    pub min_stock_level: Option<u32>,
    pub is_featured: Option<bool>,
    pub images: Option<Vec<String>>,
    pub attributes: Option<serde_json::Value>,
    pub category_id: Option<CategoryId>,
}

/// A stock ledger instruction.
#[derive(Debug, Clone, Copy)]
pub struct StockUpdate {
    pub quantity: u32,
    pub operation: StockOperation,
}

/// Service for the product catalog.
pub struct ProductService<S: ProductStore + CategoryStore> {
    store: S,
}

impl<S: ProductStore + CategoryStore> ProductService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Creates a product, validating uniqueness, price sanity, and the
    /// category reference.
    #[tracing::instrument(skip(self, create))]
    pub async fn create(&self, create: ProductCreate) -> Result<Product> {
        validate_sale_price(create.price, create.sale_price)?;
        if self.store.get_product_by_sku(&create.sku).await?.is_some() {
            return Err(DomainError::BadRequest(
                "Product with this SKU already exists".to_string(),
            ));
        }
        if self.store.get_product_by_slug(&create.slug).await?.is_some() {
            return Err(DomainError::BadRequest(
                "Product with this slug already exists".to_string(),
            ));
        }
        if self.store.get_category(create.category_id).await?.is_none() {
            return Err(DomainError::NotFound("Category not found".to_string()));
        }

        let product = Product {
            id: ProductId::new(0),
            name: create.name,
            description: create.description,
            short_description: create.short_description,
            slug: create.slug,
            sku: create.sku,
            price: create.price,
            sale_price: create.sale_price,
            cost_price: create.cost_price,
            stock_quantity: create.stock_quantity,
            min_stock_level: create.min_stock_level,
            is_active: true,
            is_featured: create.is_featured,
            images: create.images,
            attributes: create.attributes,
            category_id: create.category_id,
            created_at: Utc::now(),
            updated_at: None,
        };
        Ok(self.store.insert_product(product).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get(&self, id: ProductId) -> Result<Product> {
        self.store
            .get_product(id)
            .await?
            .ok_or_else(|| DomainError::NotFound("Product not found".to_string()))
    }

    pub async fn get_by_sku(&self, sku: &str) -> Result<Product> {
        self.store
            .get_product_by_sku(sku)
            .await?
            .ok_or_else(|| DomainError::NotFound("Product not found".to_string()))
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Product> {
        self.store
            .get_product_by_slug(slug)
            .await?
            .ok_or_else(|| DomainError::NotFound("Product not found".to_string()))
    }

    /// Updates catalog fields. Stock is out of scope here and moves only
    /// through [`ProductService::update_stock`].
    #[tracing::instrument(skip(self, patch))]
    pub async fn update(&self, id: ProductId, patch: ProductUpdate) -> Result<Product> {
        let mut product = self.get(id).await?;

        if let Some(sku) = patch.sku
            && sku != product.sku
        {
            if self.store.get_product_by_sku(&sku).await?.is_some() {
                return Err(DomainError::BadRequest(
                    "Product with this SKU already exists".to_string(),
                ));
            }
            product.sku = sku;
        }
        if let Some(slug) = patch.slug
            && slug != product.slug
        {
            if self.store.get_product_by_slug(&slug).await?.is_some() {
                return Err(DomainError::BadRequest(
                    "Product with this slug already exists".to_string(),
                ));
            }
            product.slug = slug;
        }
        if let Some(category_id) = patch.category_id
            && category_id != product.category_id
        {
            if self.store.get_category(category_id).await?.is_none() {
                return Err(DomainError::NotFound("Category not found".to_string()));
            }
            product.category_id = category_id;
        }
        if let Some(name) = patch.name {
            product.name = name;
        }
        if let Some(description) = patch.description {
            product.description = Some(description);
        }
        if let Some(short_description) = patch.short_description {
            product.short_description = Some(short_description);
        }
        if let Some(price) = patch.price {
            product.price = price;
        }
        if let Some(sale_price) = patch.sale_price {
            product.sale_price = sale_price;
        }
        if let Some(cost_price) = patch.cost_price {
            product.cost_price = cost_price;
        }
        if let Some(min_stock_level) = patch.min_stock_level {
            product.min_stock_level = min_stock_level;
        }
        if let Some(is_featured) = patch.is_featured {
            product.is_featured = is_featured;
        }
        if let Some(images) = patch.images {
            product.images = images;
        }
        if let Some(attributes) = patch.attributes {
            product.attributes = Some(attributes);
        }
        validate_sale_price(product.price, product.sale_price)?;

        Ok(self.store.update_product(product).await?)
    }

    pub async fn set_active(&self, id: ProductId, is_active: bool) -> Result<Product> {
        let mut product = self.get(id).await?;
        product.is_active = is_active;
        Ok(self.store.update_product(product).await?)
    }

    /// Conjunctive filtered search. Sort fields outside the allow-list are
    /// rejected when the filter struct is built, not here.
    #[tracing::instrument(skip(self, search))]
    pub async fn search(
        &self,
        search: &ProductSearch,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Product>> {
        Ok(self.store.search_products(search, skip, limit).await?)
    }

    pub async fn by_category(
        &self,
        category_id: CategoryId,
        active_only: bool,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<Product>> {
        Ok(self
            .store
            .list_products_by_category(category_id, active_only, skip, limit)
            .await?)
    }

    pub async fn featured(&self, skip: u64, limit: u64) -> Result<Vec<Product>> {
        Ok(self.store.list_featured(skip, limit).await?)
    }

    pub async fn low_stock(&self, skip: u64, limit: u64) -> Result<Vec<Product>> {
        Ok(self.store.list_low_stock(skip, limit).await?)
    }

    /// True iff the product exists, is active, and has at least `quantity`
    /// units in stock.
    #[tracing::instrument(skip(self))]
    pub async fn check_stock_availability(
        &self,
        id: ProductId,
        quantity: u32,
    ) -> Result<bool> {
        Ok(self
            .store
            .get_product(id)
            .await?
            .is_some_and(|p| p.is_active && p.stock_quantity >= quantity))
    }

    /// Applies a stock ledger operation with a sufficiency guard on subtract.
    ///
    /// The ledger itself floors at zero; the guard here keeps the catalog
    /// surface from silently clipping a subtraction.
    #[tracing::instrument(skip(self))]
    pub async fn update_stock(&self, id: ProductId, update: StockUpdate) -> Result<Product> {
        let product = self.get(id).await?;
        if update.operation == StockOperation::Subtract
            && product.stock_quantity < update.quantity
        {
            return Err(DomainError::BadRequest(format!(
                "Insufficient stock for product {}. Available: {}, Requested: {}",
                product.name, product.stock_quantity, update.quantity
            )));
        }
        self.store
            .update_stock(id, update.quantity, update.operation)
            .await?
            .ok_or_else(|| DomainError::NotFound("Product not found".to_string()))
    }

    /// Applies a batch of stock updates in order. Not all-or-nothing: a
    /// mid-batch failure leaves earlier updates applied.
    #[tracing::instrument(skip(self, updates))]
    pub async fn bulk_update_stock(
        &self,
        updates: Vec<(ProductId, StockUpdate)>,
    ) -> Result<Vec<Product>> {
        let mut applied = Vec::with_capacity(updates.len());
        for (id, update) in updates {
            applied.push(self.update_stock(id, update).await?);
        }
        Ok(applied)
    }
}

fn validate_sale_price(price: Money, sale_price: Option<Money>) -> Result<()> {
    if let Some(sale) = sale_price
        && sale >= price
    {
        return Err(DomainError::BadRequest(
            "Sale price must be less than regular price".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use store::MemoryStore;

    async fn seeded() -> (ProductService<MemoryStore>, CategoryId) {
        let store = MemoryStore::new();
        let category = store
            .insert_category(common::Category {
                id: CategoryId::new(0),
                name: "Gadgets".to_string(),
                slug: "gadgets".to_string(),
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
        (ProductService::new(store), category.id)
    }

    fn create(sku: &str, stock: u32, category_id: CategoryId) -> ProductCreate {
        ProductCreate {
            name: format!("Widget {sku}"),
            description: None,
            short_description: None,
            slug: sku.to_lowercase(),
            sku: sku.to_string(),
            price: Money::from_units(50),
            sale_price: None,
            cost_price: None,
            stock_quantity: stock,
            min_stock_level: 2,
            is_featured: false,
            images: vec![],
            attributes: None,
            category_id,
        }
    }

    #[tokio::test]
    async fn sale_price_must_undercut_price() {
        let (service, category_id) = seeded().await;
        let mut bad = create("SKU-1", 10, category_id);
        bad.sale_price = Some(Money::from_units(50));

        let err = service.create(bad).await.unwrap_err();
        assert_eq!(err.to_string(), "Sale price must be less than regular price");
    }

    #[tokio::test]
    async fn duplicate_sku_is_rejected() {
        let (service, category_id) = seeded().await;
        service.create(create("SKU-1", 10, category_id)).await.unwrap();

        let mut dup = create("SKU-1", 10, category_id);
        dup.slug = "other-slug".to_string();
        let err = service.create(dup).await.unwrap_err();
        assert_eq!(err.to_string(), "Product with this SKU already exists");
    }

    #[tokio::test]
    async fn subtract_is_guarded_by_a_sufficiency_check() {
        let (service, category_id) = seeded().await;
        let product = service.create(create("SKU-1", 3, category_id)).await.unwrap();

        let err = service
            .update_stock(
                product.id,
                StockUpdate {
                    quantity: 5,
                    operation: StockOperation::Subtract,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(
            err.to_string(),
            "Insufficient stock for product Widget SKU-1. Available: 3, Requested: 5"
        );

        let updated = service
            .update_stock(
                product.id,
                StockUpdate {
                    quantity: 3,
                    operation: StockOperation::Subtract,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.stock_quantity, 0);
    }

    #[tokio::test]
    async fn check_stock_availability_covers_missing_and_inactive() {
        let (service, category_id) = seeded().await;
        let product = service.create(create("SKU-1", 5, category_id)).await.unwrap();

        assert!(service.check_stock_availability(product.id, 5).await.unwrap());
        assert!(!service.check_stock_availability(product.id, 6).await.unwrap());
        assert!(
            !service
                .check_stock_availability(ProductId::new(999), 1)
                .await
                .unwrap()
        );

        service.set_active(product.id, false).await.unwrap();
        assert!(!service.check_stock_availability(product.id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn bulk_update_is_best_effort() {
        let (service, category_id) = seeded().await;
        let a = service.create(create("SKU-A", 10, category_id)).await.unwrap();
        let b = service.create(create("SKU-B", 1, category_id)).await.unwrap();

        let err = service
            .bulk_update_stock(vec![
                (
                    a.id,
                    StockUpdate {
                        quantity: 4,
                        operation: StockOperation::Subtract,
                    },
                ),
                (
                    b.id,
                    StockUpdate {
                        quantity: 2,
                        operation: StockOperation::Subtract,
                    },
                ),
            ])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        // the first update stays applied
        assert_eq!(service.get(a.id).await.unwrap().stock_quantity, 6);
        assert_eq!(service.get(b.id).await.unwrap().stock_quantity, 1);
    }

    #[tokio::test]
    async fn update_does_not_touch_stock() {
        let (service, category_id) = seeded().await;
        let product = service.create(create("SKU-1", 7, category_id)).await.unwrap();

        let patch = ProductUpdate {
            price: Some(Money::from_units(60)),
            ..ProductUpdate::default()
        };
        let updated = service.update(product.id, patch).await.unwrap();
        assert_eq!(updated.price.cents(), 6000);
        assert_eq!(updated.stock_quantity, 7);
    }
}
