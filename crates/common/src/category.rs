//! Catalog category record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CategoryId;

/// A catalog category.
///
/// Categories form a tree through `parent_id`. The parent graph must stay
/// acyclic; the category engine re-validates this on every parent
/// reassignment, so traversals can rely on it (bounded by a depth cap or a
/// visited set as a second line of defence against corrupt data).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub is_active: bool,
    pub parent_id: Option<CategoryId>,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Category {
    /// True for top-level categories (no parent).
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}
