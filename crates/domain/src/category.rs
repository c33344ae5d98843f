//! Category hierarchy service.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use common::{Category, CategoryId};
use store::{CategoryStore, ProductStore};

use crate::config::Settings;
use crate::error::{DomainError, Result};

/// Fields for creating a category.
#[derive(Debug, Clone)]
pub struct CategoryCreate {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub parent_id: Option<CategoryId>,
    pub sort_order: i32,
}

/// Partial update of a category. `None` fields are left unchanged;
/// `parent_id` uses a double `Option` so "set to root" is expressible.
#[derive(Debug, Clone, Default)]
pub struct CategoryUpdate {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub parent_id: Option<Option<CategoryId>>,
    pub sort_order: Option<i32>,
}

/// A node in a materialized category tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryNode {
    pub id: CategoryId,
    pub name: String,
    pub slug: String,
    pub is_active: bool,
    pub sort_order: i32,
    pub children: Vec<CategoryNode>,
}

/// Service for managing the category tree.
pub struct CategoryService<S: CategoryStore + ProductStore> {
    store: S,
    settings: Settings,
}

impl<S: CategoryStore + ProductStore> CategoryService<S> {
    pub fn new(store: S, settings: Settings) -> Self {
        Self { store, settings }
    }

    /// Creates a category, validating name/slug uniqueness and the parent.
    #[tracing::instrument(skip(self, create))]
    pub async fn create(&self, create: CategoryCreate) -> Result<Category> {
        if self
            .store
            .get_category_by_name(&create.name)
            .await?
            .is_some()
        {
            return Err(DomainError::BadRequest(
                "Category with this name already exists".to_string(),
            ));
        }
        if self
            .store
            .get_category_by_slug(&create.slug)
            .await?
            .is_some()
        {
            return Err(DomainError::BadRequest(
                "Category with this slug already exists".to_string(),
            ));
        }
        if let Some(parent_id) = create.parent_id {
            self.require_active_parent(parent_id).await?;
        }

        let category = Category {
            id: CategoryId::new(0),
            name: create.name,
            slug: create.slug,
            description: create.description,
            image_url: create.image_url,
            is_active: true,
            parent_id: create.parent_id,
            sort_order: create.sort_order,
            created_at: Utc::now(),
            updated_at: None,
        };
        Ok(self.store.insert_category(category).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get(&self, id: CategoryId) -> Result<Category> {
        self.store
            .get_category(id)
            .await?
            .ok_or_else(|| DomainError::NotFound("Category not found".to_string()))
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Category> {
        self.store
            .get_category_by_slug(slug)
            .await?
            .ok_or_else(|| DomainError::NotFound("Category not found".to_string()))
    }

    /// Updates a category. Parent reassignment is re-validated every time:
    /// the new parent must exist, be active, not be the category itself, and
    /// not be one of its descendants.
    #[tracing::instrument(skip(self, patch))]
    pub async fn update(&self, id: CategoryId, patch: CategoryUpdate) -> Result<Category> {
        let mut category = self.get(id).await?;

        if let Some(name) = patch.name
            && name != category.name
        {
            if self.store.get_category_by_name(&name).await?.is_some() {
                return Err(DomainError::BadRequest(
                    "Category with this name already exists".to_string(),
                ));
            }
            category.name = name;
        }
        if let Some(slug) = patch.slug
            && slug != category.slug
        {
            if self.store.get_category_by_slug(&slug).await?.is_some() {
                return Err(DomainError::BadRequest(
                    "Category with this slug already exists".to_string(),
                ));
            }
            category.slug = slug;
        }
        if let Some(new_parent) = patch.parent_id
            && new_parent != category.parent_id
        {
            if let Some(parent_id) = new_parent {
                if parent_id == id {
                    return Err(DomainError::BadRequest(
                        "Category cannot be its own parent".to_string(),
                    ));
                }
                self.require_active_parent(parent_id).await?;
                if self.would_create_cycle(id, parent_id).await? {
                    return Err(DomainError::BadRequest(
                        "Cannot set parent: would create a circular reference".to_string(),
                    ));
                }
            }
            category.parent_id = new_parent;
        }
        if let Some(description) = patch.description {
            category.description = Some(description);
        }
        if let Some(image_url) = patch.image_url {
            category.image_url = Some(image_url);
        }
        if let Some(sort_order) = patch.sort_order {
            category.sort_order = sort_order;
        }

        Ok(self.store.update_category(category).await?)
    }

    /// Deletes a category. Without `force` the delete is rejected while any
    /// direct subcategories or associated products exist; with `force` it
    /// proceeds without cascading, leaving children dangling.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: CategoryId, force: bool) -> Result<()> {
        self.get(id).await?;

        if !force {
            let children = self
                .store
                .list_categories(Some(Some(id)), false, 0, 1)
                .await?;
            if !children.is_empty() {
                return Err(DomainError::BadRequest(
                    "Cannot delete category with subcategories".to_string(),
                ));
            }
            if self.store.count_products_in_category(id).await? > 0 {
                return Err(DomainError::BadRequest(
                    "Cannot delete category with products".to_string(),
                ));
            }
        } else {
            tracing::warn!(category_id = %id, "force-deleting category without cascading");
        }

        if !self.store.delete_category(id).await? {
            return Err(DomainError::NotFound("Category not found".to_string()));
        }
        Ok(())
    }

    pub async fn set_active(&self, id: CategoryId, is_active: bool) -> Result<Category> {
        let mut category = self.get(id).await?;
        category.is_active = is_active;
        Ok(self.store.update_category(category).await?)
    }

    /// Applies new sort orders in bulk. Missing ids fail the whole call.
    #[tracing::instrument(skip(self, orders))]
    pub async fn reorder(&self, orders: Vec<(CategoryId, i32)>) -> Result<()> {
        for (id, sort_order) in orders {
            let mut category = self.get(id).await?;
            category.sort_order = sort_order;
            self.store.update_category(category).await?;
        }
        Ok(())
    }

    /// Top-level categories, ordered by sort order.
    pub async fn roots(&self, active_only: bool) -> Result<Vec<Category>> {
        Ok(self
            .store
            .list_categories(Some(None), active_only, 0, u64::MAX)
            .await?)
    }

    /// Direct children of a category, ordered by sort order.
    pub async fn children(&self, id: CategoryId, active_only: bool) -> Result<Vec<Category>> {
        self.get(id).await?;
        Ok(self
            .store
            .list_categories(Some(Some(id)), active_only, 0, u64::MAX)
            .await?)
    }

    /// Case-insensitive substring search over active category names and
    /// descriptions.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<Category>> {
        let needle = query.to_lowercase();
        let all = self.store.list_categories(None, true, 0, u64::MAX).await?;
        Ok(all
            .into_iter()
            .filter(|c| {
                c.name.to_lowercase().contains(&needle)
                    || c.description
                        .as_ref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            })
            .take(limit)
            .collect())
    }

    pub async fn count_active(&self) -> Result<u64> {
        Ok(self.store.count_categories(true).await?)
    }

    /// Materializes the active-category tree, depth-capped.
    ///
    /// `root` of `None` starts from all root categories; `max_depth` of `None`
    /// uses the configured default. The build works over a single snapshot of
    /// the table, so a corrupt parent cycle cannot cause an unbounded walk.
    #[tracing::instrument(skip(self))]
    pub async fn hierarchy(
        &self,
        root: Option<CategoryId>,
        max_depth: Option<u32>,
    ) -> Result<Vec<CategoryNode>> {
        let depth = max_depth.unwrap_or(self.settings.default_hierarchy_depth);
        let all = self.store.list_categories(None, true, 0, u64::MAX).await?;

        let mut by_parent: BTreeMap<Option<i64>, Vec<&Category>> = BTreeMap::new();
        for category in &all {
            by_parent
                .entry(category.parent_id.map(|p| p.as_i64()))
                .or_default()
                .push(category);
        }

        let starting: Vec<&Category> = match root {
            None => by_parent.get(&None).cloned().unwrap_or_default(),
            Some(root_id) => {
                let category = all
                    .iter()
                    .find(|c| c.id == root_id)
                    .ok_or_else(|| DomainError::NotFound("Category not found".to_string()))?;
                vec![category]
            }
        };

        Ok(starting
            .into_iter()
            .map(|c| build_node(c, &by_parent, depth))
            .collect())
    }

    async fn require_active_parent(&self, parent_id: CategoryId) -> Result<()> {
        let parent = self
            .store
            .get_category(parent_id)
            .await?
            .ok_or_else(|| DomainError::NotFound("Parent category not found".to_string()))?;
        if !parent.is_active {
            return Err(DomainError::BadRequest(
                "Parent category is not active".to_string(),
            ));
        }
        Ok(())
    }

    /// Walks up from the proposed parent following `parent_id` links. A cycle
    /// would form exactly when `id` is encountered before a null parent. The
    /// visited set guarantees termination even on pre-existing corrupt data.
    async fn would_create_cycle(&self, id: CategoryId, new_parent: CategoryId) -> Result<bool> {
        let mut visited: HashSet<i64> = HashSet::new();
        let mut current = Some(new_parent);
        while let Some(cursor) = current {
            if cursor == id {
                return Ok(true);
            }
            if !visited.insert(cursor.as_i64()) {
                break;
            }
            current = match self.store.get_category(cursor).await? {
                Some(category) => category.parent_id,
                None => None,
            };
        }
        Ok(false)
    }
}

fn build_node(
    category: &Category,
    by_parent: &BTreeMap<Option<i64>, Vec<&Category>>,
    depth: u32,
) -> CategoryNode {
    let children = if depth > 1 {
        by_parent
            .get(&Some(category.id.as_i64()))
            .map(|kids| {
                kids.iter()
                    .map(|kid| build_node(kid, by_parent, depth - 1))
                    .collect()
            })
            .unwrap_or_default()
    } else {
        Vec::new()
    };
    CategoryNode {
        id: category.id,
        name: category.name.clone(),
        slug: category.slug.clone(),
        is_active: category.is_active,
        sort_order: category.sort_order,
        children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use store::MemoryStore;

    fn service() -> CategoryService<MemoryStore> {
        CategoryService::new(MemoryStore::new(), Settings::default())
    }

    fn create(name: &str, parent: Option<CategoryId>) -> CategoryCreate {
        CategoryCreate {
            name: name.to_string(),
            slug: name.to_lowercase().replace(' ', "-"),
            description: None,
            image_url: None,
            parent_id: parent,
            sort_order: 0,
        }
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let service = service();
        service.create(create("Phones", None)).await.unwrap();

        let err = service.create(create("Phones", None)).await.unwrap_err();
        assert_eq!(err.to_string(), "Category with this name already exists");
    }

    #[tokio::test]
    async fn parenting_to_a_descendant_is_a_circular_reference() {
        let service = service();
        let phones = service.create(create("Phones", None)).await.unwrap();
        let smart = service
            .create(create("Smartphones", Some(phones.id)))
            .await
            .unwrap();

        let patch = CategoryUpdate {
            parent_id: Some(Some(smart.id)),
            ..CategoryUpdate::default()
        };
        let err = service.update(phones.id, patch).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(
            err.to_string(),
            "Cannot set parent: would create a circular reference"
        );
    }

    #[tokio::test]
    async fn self_parenting_is_rejected() {
        let service = service();
        let phones = service.create(create("Phones", None)).await.unwrap();

        let patch = CategoryUpdate {
            parent_id: Some(Some(phones.id)),
            ..CategoryUpdate::default()
        };
        let err = service.update(phones.id, patch).await.unwrap_err();
        assert_eq!(err.to_string(), "Category cannot be its own parent");
    }

    #[tokio::test]
    async fn delete_is_blocked_by_children_unless_forced() {
        let service = service();
        let phones = service.create(create("Phones", None)).await.unwrap();
        service
            .create(create("Smartphones", Some(phones.id)))
            .await
            .unwrap();

        let err = service.delete(phones.id, false).await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot delete category with subcategories");

        service.delete(phones.id, true).await.unwrap();
        assert!(service.get(phones.id).await.is_err());
    }

    #[tokio::test]
    async fn hierarchy_is_depth_capped() {
        let service = service();
        let a = service.create(create("A", None)).await.unwrap();
        let b = service.create(create("B", Some(a.id))).await.unwrap();
        let c = service.create(create("C", Some(b.id))).await.unwrap();
        service.create(create("D", Some(c.id))).await.unwrap();

        let tree = service.hierarchy(None, Some(2)).await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].name, "A");
        assert_eq!(tree[0].children.len(), 1);
        assert!(tree[0].children[0].children.is_empty());
    }

    #[tokio::test]
    async fn hierarchy_from_a_given_root() {
        let service = service();
        let a = service.create(create("A", None)).await.unwrap();
        let b = service.create(create("B", Some(a.id))).await.unwrap();
        service.create(create("C", Some(b.id))).await.unwrap();

        let tree = service.hierarchy(Some(b.id), None).await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].name, "B");
        assert_eq!(tree[0].children[0].name, "C");
    }
}
