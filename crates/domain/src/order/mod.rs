//! Order engine: cart-to-order conversion, totals, the status state
//! machines, and compensating stock restoration on cancellation.

mod service;

pub use service::OrderService;

use chrono::{DateTime, Utc};
use common::ProductId;
use uuid::Uuid;

/// Inbound order fields from the caller.
#[derive(Debug, Clone)]
pub struct OrderCreate {
    pub shipping_address: String,
    pub shipping_city: String,
    pub shipping_country: String,
    pub shipping_postal_code: String,
    pub shipping_phone: Option<String>,
    pub billing_address: Option<String>,
    pub billing_city: Option<String>,
    pub billing_country: Option<String>,
    pub billing_postal_code: Option<String>,
    pub notes: Option<String>,
    pub payment_method: Option<String>,
}

/// An explicit line item for direct order creation.
#[derive(Debug, Clone, Copy)]
pub struct OrderItemInput {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Date-prefixed order number with a random suffix.
///
/// Uniqueness is probabilistic; a collision surfaces as a store-level unique
/// violation rather than being retried.
pub(crate) fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "ORD-{}-{}",
        now.format("%Y%m%d"),
        suffix[..8].to_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_number_format() {
        let now = "2026-08-24T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let number = generate_order_number(now);
        assert!(number.starts_with("ORD-20260824-"));
        assert_eq!(number.len(), "ORD-20260824-".len() + 8);
        assert!(
            number["ORD-20260824-".len()..]
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        );
    }

    #[test]
    fn order_numbers_are_distinct() {
        let now = Utc::now();
        assert_ne!(generate_order_number(now), generate_order_number(now));
    }
}
