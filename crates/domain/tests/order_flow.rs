//! End-to-end checkout flows against the in-memory store.

use chrono::Utc;
use common::{
    CartOwner, Category, CategoryId, Money, OrderStatus, PaymentStatus, Product, ProductId,
    StockOperation, UserId,
};
use domain::{Actor, CartService, OrderCreate, OrderItemInput, OrderService, Settings};
use store::{CategoryStore, MemoryStore, OrderStore, ProductStore};

async fn seed_product(store: &MemoryStore, sku: &str, price_units: i64, stock: u32) -> Product {
    let category = store
        .insert_category(Category {
            id: CategoryId::new(0),
            name: format!("Category {sku}"),
            slug: format!("category-{sku}").to_lowercase(),
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
    store
        .insert_product(Product {
            id: ProductId::new(0),
            name: format!("Product {sku}"),
            description: None,
            short_description: None,
            slug: sku.to_lowercase(),
            sku: sku.to_string(),
            price: Money::from_units(price_units),
            sale_price: None,
            cost_price: None,
            stock_quantity: stock,
            min_stock_level: 0,
            is_active: true,
            is_featured: false,
            images: vec![],
            attributes: None,
            category_id: category.id,
            created_at: Utc::now(),
            updated_at: None,
        })
        .await
        .unwrap()
}

fn order_data() -> OrderCreate {
    OrderCreate {
        shipping_address: "1 Main St".to_string(),
        shipping_city: "Springfield".to_string(),
        shipping_country: "US".to_string(),
        shipping_postal_code: "12345".to_string(),
        shipping_phone: None,
        billing_address: None,
        billing_city: None,
        billing_country: None,
        billing_postal_code: None,
        notes: None,
        payment_method: Some("card".to_string()),
    }
}

async fn stock_of(store: &MemoryStore, id: ProductId) -> u32 {
    store.get_product(id).await.unwrap().unwrap().stock_quantity
}

#[tokio::test]
async fn checkout_computes_totals_and_decrements_stock() {
    let store = MemoryStore::new();
    let carts = CartService::new(store.clone(), Settings::default());
    let orders = OrderService::new(store.clone(), Settings::default());

    let a = seed_product(&store, "SKU-A", 50, 10).await;
    let b = seed_product(&store, "SKU-B", 30, 1).await;
    let actor = Actor::user(UserId::new(1));

    let cart = carts
        .get_or_create(&CartOwner::User(actor.user_id))
        .await
        .unwrap();
    carts.add_item(cart.cart.id, a.id, 2).await.unwrap();
    carts.add_item(cart.cart.id, b.id, 1).await.unwrap();

    let (order, items) = orders
        .create_from_cart(cart.cart.id, &actor, order_data())
        .await
        .unwrap();

    // 130.00 subtotal, 21% tax, free shipping at or above 100.00
    assert_eq!(order.subtotal, Money::from_cents(13000));
    assert_eq!(order.tax_amount, Money::from_cents(2730));
    assert_eq!(order.shipping_cost, Money::zero());
    assert_eq!(order.total_amount, Money::from_cents(15730));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert!(order.order_number.starts_with("ORD-"));

    assert_eq!(items.len(), 2);
    let line_a = items.iter().find(|i| i.product_id == a.id).unwrap();
    assert_eq!(line_a.product_name, "Product SKU-A");
    assert_eq!(line_a.product_sku, "SKU-A");
    assert_eq!(line_a.total_price, Money::from_cents(10000));

    assert_eq!(stock_of(&store, a.id).await, 8);
    assert_eq!(stock_of(&store, b.id).await, 0);

    // the caller deactivates the source cart after checkout
    carts.deactivate(cart.cart.id, Some(&actor)).await.unwrap();
    assert!(
        carts
            .get_active(&CartOwner::User(actor.user_id))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn small_orders_pay_the_flat_shipping_fee() {
    let store = MemoryStore::new();
    let orders = OrderService::new(store.clone(), Settings::default());
    let product = seed_product(&store, "SKU-1", 30, 5).await;
    let actor = Actor::user(UserId::new(1));

    let (order, _) = orders
        .create_direct(
            &actor,
            vec![OrderItemInput {
                product_id: product.id,
                quantity: 1,
            }],
            order_data(),
        )
        .await
        .unwrap();

    assert_eq!(order.subtotal, Money::from_cents(3000));
    assert_eq!(order.tax_amount, Money::from_cents(630));
    assert_eq!(order.shipping_cost, Money::from_cents(1000));
    assert_eq!(order.total_amount, Money::from_cents(4630));
}

#[tokio::test]
async fn insufficient_stock_aborts_checkout_without_side_effects() {
    let store = MemoryStore::new();
    let carts = CartService::new(store.clone(), Settings::default());
    let orders = OrderService::new(store.clone(), Settings::default());

    let a = seed_product(&store, "SKU-A", 50, 10).await;
    let b = seed_product(&store, "SKU-B", 30, 1).await;
    let actor = Actor::user(UserId::new(1));

    let cart = carts
        .get_or_create(&CartOwner::User(actor.user_id))
        .await
        .unwrap();
    carts.add_item(cart.cart.id, a.id, 2).await.unwrap();
    carts.add_item(cart.cart.id, b.id, 1).await.unwrap();

    // B sells out between add-to-cart and checkout
    store
        .update_stock(b.id, 0, StockOperation::Set)
        .await
        .unwrap();

    let err = orders
        .create_from_cart(cart.cart.id, &actor, order_data())
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Insufficient stock for product Product SKU-B. Available: 0, Requested: 1"
    );

    assert!(
        store
            .list_orders_by_user(actor.user_id, 0, 10)
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(stock_of(&store, a.id).await, 10);
}

#[tokio::test]
async fn cancelling_a_confirmed_order_restores_stock() {
    let store = MemoryStore::new();
    let carts = CartService::new(store.clone(), Settings::default());
    let orders = OrderService::new(store.clone(), Settings::default());

    let product = seed_product(&store, "SKU-1", 50, 10).await;
    let actor = Actor::user(UserId::new(1));
    let admin = Actor::superuser(UserId::new(9));

    let cart = carts
        .get_or_create(&CartOwner::User(actor.user_id))
        .await
        .unwrap();
    carts.add_item(cart.cart.id, product.id, 3).await.unwrap();

    let (order, _) = orders
        .create_from_cart(cart.cart.id, &actor, order_data())
        .await
        .unwrap();
    assert_eq!(stock_of(&store, product.id).await, 7);

    orders
        .update_status(order.id, OrderStatus::Confirmed, &admin)
        .await
        .unwrap();
    let cancelled = orders.cancel(order.id, "no longer needed", &actor).await.unwrap();

    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(stock_of(&store, product.id).await, 10);
}

#[tokio::test]
async fn cancelling_a_pending_order_leaves_stock_alone() {
    let store = MemoryStore::new();
    let carts = CartService::new(store.clone(), Settings::default());
    let orders = OrderService::new(store.clone(), Settings::default());

    let product = seed_product(&store, "SKU-1", 50, 10).await;
    let actor = Actor::user(UserId::new(1));

    let cart = carts
        .get_or_create(&CartOwner::User(actor.user_id))
        .await
        .unwrap();
    carts.add_item(cart.cart.id, product.id, 3).await.unwrap();
    let (order, _) = orders
        .create_from_cart(cart.cart.id, &actor, order_data())
        .await
        .unwrap();
    assert_eq!(stock_of(&store, product.id).await, 7);

    orders.cancel(order.id, "typo", &actor).await.unwrap();
    assert_eq!(stock_of(&store, product.id).await, 7);
}

#[tokio::test]
async fn shipped_at_is_stamped_once() {
    let store = MemoryStore::new();
    let orders = OrderService::new(store.clone(), Settings::default());
    let product = seed_product(&store, "SKU-1", 50, 10).await;
    let actor = Actor::user(UserId::new(1));
    let admin = Actor::superuser(UserId::new(9));

    let (order, _) = orders
        .create_direct(
            &actor,
            vec![OrderItemInput {
                product_id: product.id,
                quantity: 1,
            }],
            order_data(),
        )
        .await
        .unwrap();

    orders
        .update_status(order.id, OrderStatus::Confirmed, &admin)
        .await
        .unwrap();
    orders
        .update_status(order.id, OrderStatus::Processing, &admin)
        .await
        .unwrap();
    let shipped = orders
        .update_status(order.id, OrderStatus::Shipped, &admin)
        .await
        .unwrap();
    let shipped_at = shipped.shipped_at.unwrap();

    // shipped is not a valid source for shipped; the stamp stays put
    assert!(
        orders
            .update_status(order.id, OrderStatus::Shipped, &admin)
            .await
            .is_err()
    );
    let current = orders.get(order.id, &admin).await.unwrap();
    assert_eq!(current.shipped_at, Some(shipped_at));

    let delivered = orders
        .update_status(order.id, OrderStatus::Delivered, &admin)
        .await
        .unwrap();
    assert!(delivered.delivered_at.is_some());
    assert_eq!(delivered.shipped_at, Some(shipped_at));

    // delivered is terminal
    for next in [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ] {
        assert!(orders.update_status(order.id, next, &admin).await.is_err());
    }
}

#[tokio::test]
async fn order_totals_survive_later_price_changes() {
    let store = MemoryStore::new();
    let orders = OrderService::new(store.clone(), Settings::default());
    let product = seed_product(&store, "SKU-1", 50, 10).await;
    let actor = Actor::user(UserId::new(1));

    let (order, _) = orders
        .create_direct(
            &actor,
            vec![OrderItemInput {
                product_id: product.id,
                quantity: 2,
            }],
            order_data(),
        )
        .await
        .unwrap();
    let total_before = order.total_amount;

    let mut repriced = store.get_product(product.id).await.unwrap().unwrap();
    repriced.price = Money::from_units(99);
    store.update_product(repriced).await.unwrap();

    let after = orders.get(order.id, &actor).await.unwrap();
    assert_eq!(after.total_amount, total_before);
    let items = orders.items(order.id, &actor).await.unwrap();
    assert_eq!(items[0].unit_price, Money::from_units(50));
}

#[tokio::test]
async fn orders_are_only_visible_to_their_owner_or_admins() {
    let store = MemoryStore::new();
    let orders = OrderService::new(store.clone(), Settings::default());
    let product = seed_product(&store, "SKU-1", 50, 10).await;
    let owner = Actor::user(UserId::new(1));
    let stranger = Actor::user(UserId::new(2));
    let admin = Actor::superuser(UserId::new(9));

    let (order, _) = orders
        .create_direct(
            &owner,
            vec![OrderItemInput {
                product_id: product.id,
                quantity: 1,
            }],
            order_data(),
        )
        .await
        .unwrap();

    assert!(orders.get(order.id, &owner).await.is_ok());
    assert!(orders.get(order.id, &admin).await.is_ok());
    assert!(orders.get(order.id, &stranger).await.is_err());
    assert!(
        orders
            .get_by_number(&order.order_number, &stranger)
            .await
            .is_err()
    );
    assert!(
        orders
            .list_for_user(owner.user_id, 0, 10, &stranger)
            .await
            .is_err()
    );
}
