//! Domain engines for the storefront core.
//!
//! Each service wraps the narrow store traits it needs and enforces the
//! business rules: cart ownership and merging, the order status state
//! machines with compensating stock restoration, category tree integrity,
//! and catalog stock orchestration.

pub mod actor;
pub mod cart;
pub mod catalog;
pub mod category;
pub mod config;
pub mod error;
pub mod order;
pub mod user;

pub use actor::Actor;
pub use cart::{CartService, CartSummary, StockCheck};
pub use catalog::{ProductCreate, ProductService, ProductUpdate, StockUpdate};
pub use category::{CategoryCreate, CategoryNode, CategoryService, CategoryUpdate};
pub use config::Settings;
pub use error::{DomainError, ErrorKind, Result};
pub use order::{OrderCreate, OrderItemInput, OrderService};
pub use user::{UserCreate, UserService, UserUpdate};
