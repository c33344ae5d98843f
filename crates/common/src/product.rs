//! Product record, stock ledger operations, and catalog search filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CategoryId, Money, ProductId};

/// A catalog product.
///
/// `stock_quantity` is mutated only through [`StockOperation`]s applied by the
/// product store, never by direct field assignment from outside the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub slug: String,
    pub sku: String,
    pub price: Money,
    /// Discounted price; must be strictly less than `price` when present.
    pub sale_price: Option<Money>,
    pub cost_price: Option<Money>,
    pub stock_quantity: u32,
    /// Low-stock alert threshold.
    pub min_stock_level: u32,
    pub is_active: bool,
    pub is_featured: bool,
    pub images: Vec<String>,
    pub attributes: Option<serde_json::Value>,
    pub category_id: CategoryId,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Product {
    /// The price a buyer pays right now: sale price when set, else list price.
    pub fn current_price(&self) -> Money {
        self.sale_price.unwrap_or(self.price)
    }

    /// True when at least one unit is available.
    pub fn is_in_stock(&self) -> bool {
        self.stock_quantity > 0
    }

    /// True when stock is at or below the alert threshold.
    pub fn is_low_stock(&self) -> bool {
        self.stock_quantity <= self.min_stock_level
    }

    /// Applies a stock ledger operation, returning the new quantity.
    ///
    /// `Subtract` floors at zero rather than failing, so it is not guaranteed
    /// to reduce stock by exactly `quantity` when stock is insufficient.
    /// Business-level sufficiency checks belong to the callers.
    pub fn apply_stock_operation(&mut self, quantity: u32, operation: StockOperation) -> u32 {
        self.stock_quantity = match operation {
            StockOperation::Add => self.stock_quantity.saturating_add(quantity),
            StockOperation::Subtract => self.stock_quantity.saturating_sub(quantity),
            StockOperation::Set => quantity,
        };
        self.stock_quantity
    }
}

/// Stock ledger operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockOperation {
    Add,
    Subtract,
    Set,
}

impl StockOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockOperation::Add => "add",
            StockOperation::Subtract => "subtract",
            StockOperation::Set => "set",
        }
    }
}

impl std::fmt::Display for StockOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sortable product fields (closed allow-list).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Name,
    Price,
    CreatedAt,
    StockQuantity,
}

impl SortField {
    /// Parses a client-supplied sort field name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "name" => Some(SortField::Name),
            "price" => Some(SortField::Price),
            "created_at" => Some(SortField::CreatedAt),
            "stock_quantity" => Some(SortField::StockQuantity),
            _ => None,
        }
    }

    /// The backing column name.
    pub fn column(&self) -> &'static str {
        match self {
            SortField::Name => "name",
            SortField::Price => "price",
            SortField::CreatedAt => "created_at",
            SortField::StockQuantity => "stock_quantity",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Conjunctive catalog search filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductSearch {
    /// Case-insensitive substring match against name, description, and SKU.
    pub query: Option<String>,
    pub category_id: Option<CategoryId>,
    pub min_price: Option<Money>,
    pub max_price: Option<Money>,
    pub is_featured: Option<bool>,
    /// `Some(true)`: stock > 0; `Some(false)`: stock <= 0.
    pub in_stock: Option<bool>,
    pub sort_by: Option<SortField>,
    pub sort_order: SortOrder,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(stock: u32) -> Product {
        Product {
            id: ProductId::new(1),
            name: "Widget".into(),
            description: None,
            short_description: None,
            slug: "widget".into(),
            sku: "SKU-001".into(),
            price: Money::from_cents(5000),
            sale_price: None,
            cost_price: None,
            stock_quantity: stock,
            min_stock_level: 5,
            is_active: true,
            is_featured: false,
            images: vec![],
            attributes: None,
            category_id: CategoryId::new(1),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn current_price_prefers_sale_price() {
        let mut p = product(10);
        assert_eq!(p.current_price().cents(), 5000);
        p.sale_price = Some(Money::from_cents(4000));
        assert_eq!(p.current_price().cents(), 4000);
    }

    #[test]
    fn stock_flags() {
        let p = product(0);
        assert!(!p.is_in_stock());
        assert!(p.is_low_stock());

        let p = product(6);
        assert!(p.is_in_stock());
        assert!(!p.is_low_stock());

        // at exactly the threshold, low-stock is reported
        let p = product(5);
        assert!(p.is_low_stock());
    }

    #[test]
    fn subtract_floors_at_zero() {
        let mut p = product(3);
        let remaining = p.apply_stock_operation(10, StockOperation::Subtract);
        assert_eq!(remaining, 0);
        assert_eq!(p.stock_quantity, 0);
    }

    #[test]
    fn add_and_set_operations() {
        let mut p = product(3);
        assert_eq!(p.apply_stock_operation(2, StockOperation::Add), 5);
        assert_eq!(p.apply_stock_operation(7, StockOperation::Set), 7);
    }

    #[test]
    fn sort_field_allow_list() {
        assert_eq!(SortField::parse("price"), Some(SortField::Price));
        assert_eq!(SortField::parse("created_at"), Some(SortField::CreatedAt));
        assert_eq!(SortField::parse("sku"), None);
        assert_eq!(SortField::parse(""), None);
    }
}
