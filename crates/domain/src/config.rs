//! Service configuration.

use common::Money;

/// Settings shared by the domain services.
///
/// Constructed once at process start and passed into every service
/// constructor; there is no ambient global state.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Flat tax rate applied to order subtotals, in percent.
    pub tax_rate_percent: u32,
    /// Orders at or above this subtotal ship for free.
    pub free_shipping_threshold: Money,
    /// Flat shipping fee below the free-shipping threshold.
    pub standard_shipping_fee: Money,
    /// Inactive carts older than this are removed by the retention sweep.
    pub cart_retention_days: i64,
    /// Default depth cap for category tree materialization.
    pub default_hierarchy_depth: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tax_rate_percent: 21,
            free_shipping_threshold: Money::from_units(100),
            standard_shipping_fee: Money::from_units(10),
            cart_retention_days: 30,
            default_hierarchy_depth: 3,
        }
    }
}

impl Settings {
    /// Builds settings from the environment, falling back to defaults for
    /// anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(v) = std::env::var("TAX_RATE_PERCENT")
            && let Ok(rate) = v.parse()
        {
            settings.tax_rate_percent = rate;
        }
        if let Ok(v) = std::env::var("FREE_SHIPPING_THRESHOLD_CENTS")
            && let Ok(cents) = v.parse()
        {
            settings.free_shipping_threshold = Money::from_cents(cents);
        }
        if let Ok(v) = std::env::var("STANDARD_SHIPPING_FEE_CENTS")
            && let Ok(cents) = v.parse()
        {
            settings.standard_shipping_fee = Money::from_cents(cents);
        }
        if let Ok(v) = std::env::var("CART_RETENTION_DAYS")
            && let Ok(days) = v.parse()
        {
            settings.cart_retention_days = days;
        }
        if let Ok(v) = std::env::var("CATEGORY_HIERARCHY_DEPTH")
            && let Ok(depth) = v.parse()
        {
            settings.default_hierarchy_depth = depth;
        }
        settings
    }
}
