//! Shared types for the storefront domain core.
//!
//! This crate holds the entity records, typed identifiers, and the `Money`
//! value type. Computed values (current price, stock flags, line subtotals,
//! status transition rules) are pure functions over stored fields so they can
//! never go stale.

pub mod cart;
pub mod category;
pub mod ids;
pub mod money;
pub mod order;
pub mod product;
pub mod user;

pub use cart::{Cart, CartItem, CartOwner, CartWithItems};
pub use category::Category;
pub use ids::{CartId, CartItemId, CategoryId, OrderId, OrderItemId, ProductId, UserId};
pub use money::Money;
pub use order::{Order, OrderItem, OrderStatus, PaymentStatus, total_items};
pub use product::{Product, ProductSearch, SortField, SortOrder, StockOperation};
pub use user::User;
