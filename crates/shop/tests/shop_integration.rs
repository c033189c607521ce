//! Integration tests: shop requests → pipeline → in-memory store, with notifications and stock alerts.

use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use domain::{CartEvent, CatalogError, CustomerId, DomainError, Money, OrderError, OrderStatus, ProductId};
use pipeline::{BoxError, DispatchError, Dispatcher, EventHandler, RequestContext};
use shop::{
    AddCartItem, CancelOrder, ChangePrice, ClearCart, CreateProduct, GetCart, GetOrder,
    GetProduct, InMemoryNotifier, ListProducts, LowStockMonitor, NotificationKind, PayOrder,
    PlaceOrder, RemoveCartItem, ShipOrder,
};
use store::InMemoryStore;

struct Shop {
    dispatcher: Dispatcher,
    store: InMemoryStore,
    notifier: InMemoryNotifier,
    monitor: LowStockMonitor,
}

fn store() -> InMemoryStore {
    InMemoryStore::new().with_unique_index("products_sku_key", "Product", "sku")
}

fn setup() -> Shop {
    setup_with(|builder| builder)
}

fn setup_with(
    extend: impl FnOnce(pipeline::DispatcherBuilder) -> pipeline::DispatcherBuilder,
) -> Shop {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let store = store();
    let notifier = InMemoryNotifier::new();
    let monitor = LowStockMonitor::new(5);

    let builder = shop::register(
        Dispatcher::builder(Arc::new(store.clone())),
        Arc::new(notifier.clone()),
        monitor.clone(),
    );
    let dispatcher = extend(builder).build().unwrap();

    Shop {
        dispatcher,
        store,
        notifier,
        monitor,
    }
}

impl Shop {
    async fn product(&self, sku: &str, cents: i64, stock: u32) -> AggregateId {
        self.dispatcher
            .send(CreateProduct::new(sku, format!("Product {sku}"), Money::from_cents(cents), stock))
            .await
            .unwrap()
    }

    async fn add(&self, cart_id: AggregateId, customer_id: CustomerId, product_id: AggregateId, quantity: u32) {
        self.dispatcher
            .send(AddCartItem {
                cart_id,
                customer_id,
                product_id,
                quantity,
            })
            .await
            .unwrap();
    }

    async fn stock(&self, product_id: AggregateId) -> u32 {
        self.dispatcher
            .send(GetProduct { product_id })
            .await
            .unwrap()
            .unwrap()
            .stock
    }
}

/// Rejects every `CartCleared` event.
struct RejectCartCleared;

#[async_trait]
impl EventHandler<CartEvent> for RejectCartCleared {
    fn name(&self) -> &'static str {
        "reject-cart-cleared"
    }

    async fn handle(&self, event: &CartEvent, _ctx: &mut RequestContext) -> Result<(), BoxError> {
        match event {
            CartEvent::CartCleared(_) => Err("cart archive unavailable".into()),
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_products_are_listed_by_sku() {
    let shop = setup();
    shop.product("SKU-B", 2_000, 3).await;
    shop.product("SKU-A", 1_000, 7).await;

    let products = shop.dispatcher.send(ListProducts).await.unwrap();

    let skus: Vec<_> = products.iter().map(|p| p.sku.clone()).collect();
    assert_eq!(skus, vec![ProductId::new("SKU-A"), ProductId::new("SKU-B")]);
    assert_eq!(products[0].stock, 7);
}

#[tokio::test]
async fn test_duplicate_sku_is_rejected_by_the_store() {
    let shop = setup();
    shop.product("SKU-1", 1_000, 1).await;

    let result = shop
        .dispatcher
        .send(CreateProduct::new("SKU-1", "Copy", Money::from_cents(500), 1))
        .await;

    assert!(matches!(result, Err(DispatchError::Persistence(_))));
    assert_eq!(shop.dispatcher.send(ListProducts).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_product_is_rejected_before_any_transaction() {
    let shop = setup();

    let result = shop
        .dispatcher
        .send(CreateProduct::new("SKU-1", " ", Money::from_cents(-5), 1))
        .await;

    match result {
        Err(DispatchError::Validation(error)) => {
            assert_eq!(error.request, "CreateProduct");
            assert!(error.has_failure("name_present"));
            assert!(error.has_failure("price_positive"));
        }
        other => panic!("Expected validation error, got {other:?}"),
    }
    assert_eq!(shop.store.stats().transactions_begun(), 0);
}

#[tokio::test]
async fn test_price_change_keeps_cart_price() {
    let shop = setup();
    let product_id = shop.product("SKU-1", 1_000, 10).await;
    let cart_id = AggregateId::new();
    shop.add(cart_id, CustomerId::new(), product_id, 2).await;

    let view = shop
        .dispatcher
        .send(ChangePrice {
            product_id,
            price: Money::from_cents(1_500),
        })
        .await
        .unwrap();
    assert_eq!(view.price, Money::from_cents(1_500));

    let cart = shop.dispatcher.send(GetCart { cart_id }).await.unwrap().unwrap();
    assert_eq!(cart.total, Money::from_cents(2_000));
}

// ---------------------------------------------------------------------------
// Cart
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cart_accumulates_and_removes_items() {
    let shop = setup();
    let lamp = shop.product("SKU-LAMP", 4_500, 10).await;
    let desk = shop.product("SKU-DESK", 20_000, 2).await;
    let cart_id = AggregateId::new();
    let customer_id = CustomerId::new();

    shop.add(cart_id, customer_id, lamp, 1).await;
    shop.add(cart_id, customer_id, lamp, 2).await;
    shop.add(cart_id, customer_id, desk, 1).await;

    let cart = shop.dispatcher.send(GetCart { cart_id }).await.unwrap().unwrap();
    assert_eq!(cart.customer_id, customer_id);
    assert_eq!(cart.lines.len(), 2);
    assert_eq!(cart.total_quantity, 4);
    assert_eq!(cart.total, Money::from_cents(3 * 4_500 + 20_000));

    let cart = shop
        .dispatcher
        .send(RemoveCartItem {
            cart_id,
            sku: ProductId::new("SKU-DESK"),
        })
        .await
        .unwrap();
    assert_eq!(cart.lines.len(), 1);
    assert_eq!(cart.total, Money::from_cents(3 * 4_500));
}

#[tokio::test]
async fn test_adding_unknown_product_fails() {
    let shop = setup();
    let cart_id = AggregateId::new();

    let result = shop
        .dispatcher
        .send(AddCartItem {
            cart_id,
            customer_id: CustomerId::new(),
            product_id: AggregateId::new(),
            quantity: 1,
        })
        .await;

    assert!(matches!(
        result,
        Err(DispatchError::NotFound {
            aggregate_type: "Product",
            ..
        })
    ));
    assert!(shop.dispatcher.send(GetCart { cart_id }).await.unwrap().is_none());
}

#[tokio::test]
async fn test_clearing_a_cart_deletes_it() {
    let shop = setup();
    let product_id = shop.product("SKU-1", 1_000, 10).await;
    let cart_id = AggregateId::new();
    shop.add(cart_id, CustomerId::new(), product_id, 1).await;

    shop.dispatcher.send(ClearCart { cart_id }).await.unwrap();

    assert!(shop.dispatcher.send(GetCart { cart_id }).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Checkout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_checkout_reserves_stock_and_clears_cart() {
    let shop = setup();
    let lamp = shop.product("SKU-LAMP", 4_500, 10).await;
    let desk = shop.product("SKU-DESK", 20_000, 6).await;
    let cart_id = AggregateId::new();
    let customer_id = CustomerId::new();
    shop.add(cart_id, customer_id, lamp, 2).await;
    shop.add(cart_id, customer_id, desk, 3).await;

    let order = shop.dispatcher.send(PlaceOrder::new(cart_id)).await.unwrap();

    assert_eq!(order.status, OrderStatus::Placed);
    assert_eq!(order.customer_id, customer_id);
    assert_eq!(order.total, Money::from_cents(2 * 4_500 + 3 * 20_000));

    assert_eq!(shop.stock(lamp).await, 8);
    assert_eq!(shop.stock(desk).await, 3);
    assert!(shop.dispatcher.send(GetCart { cart_id }).await.unwrap().is_none());

    let stored = shop
        .dispatcher
        .send(GetOrder {
            order_id: order.order_id,
        })
        .await
        .unwrap();
    assert_eq!(stored, Some(order.clone()));

    let confirmations = shop.notifier.sent_of(NotificationKind::OrderConfirmation);
    assert_eq!(confirmations.len(), 1);
    assert_eq!(confirmations[0].order_id, order.order_id);

    let alerts = shop.monitor.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].product_id, desk);
    assert_eq!(alerts[0].remaining, 3);
}

#[tokio::test]
async fn test_insufficient_stock_leaves_everything_untouched() {
    let shop = setup();
    let lamp = shop.product("SKU-LAMP", 4_500, 10).await;
    let rare = shop.product("SKU-RARE", 99_000, 1).await;
    let cart_id = AggregateId::new();
    let customer_id = CustomerId::new();
    shop.add(cart_id, customer_id, lamp, 1).await;
    shop.add(cart_id, customer_id, rare, 2).await;

    let place = PlaceOrder::new(cart_id);
    let order_id = place.order_id;
    let result = shop.dispatcher.send(place).await;

    assert!(matches!(
        result,
        Err(DispatchError::Domain(DomainError::Catalog(
            CatalogError::InsufficientStock {
                requested: 2,
                available: 1,
                ..
            }
        )))
    ));
    assert_eq!(shop.stock(lamp).await, 10);
    assert_eq!(shop.stock(rare).await, 1);
    assert!(shop.dispatcher.send(GetCart { cart_id }).await.unwrap().is_some());
    assert!(shop.dispatcher.send(GetOrder { order_id }).await.unwrap().is_none());
    assert!(shop.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_notification_failure_rolls_back_checkout() {
    let shop = setup();
    let lamp = shop.product("SKU-LAMP", 4_500, 10).await;
    let cart_id = AggregateId::new();
    shop.add(cart_id, CustomerId::new(), lamp, 4).await;
    shop.notifier.set_fail(true);

    let place = PlaceOrder::new(cart_id);
    let order_id = place.order_id;
    let result = shop.dispatcher.send(place).await;

    assert!(matches!(
        result,
        Err(DispatchError::EventHandler {
            handler: "customer-notifier",
            event_type: "OrderPlaced",
            ..
        })
    ));
    assert_eq!(shop.stock(lamp).await, 10);
    assert!(shop.dispatcher.send(GetCart { cart_id }).await.unwrap().is_some());
    assert!(shop.dispatcher.send(GetOrder { order_id }).await.unwrap().is_none());
}

#[tokio::test]
async fn test_nested_failure_rolls_back_but_sent_notification_stays_sent() {
    let shop = setup_with(|builder| builder.subscribe::<CartEvent, _>(RejectCartCleared));
    let lamp = shop.product("SKU-LAMP", 4_500, 10).await;
    let cart_id = AggregateId::new();
    shop.add(cart_id, CustomerId::new(), lamp, 1).await;

    let place = PlaceOrder::new(cart_id);
    let order_id = place.order_id;
    let result = shop.dispatcher.send(place).await;

    assert!(matches!(
        result,
        Err(DispatchError::EventHandler {
            handler: "reject-cart-cleared",
            ..
        })
    ));
    assert_eq!(shop.stock(lamp).await, 10);
    assert!(shop.dispatcher.send(GetOrder { order_id }).await.unwrap().is_none());
    assert!(shop.dispatcher.send(GetCart { cart_id }).await.unwrap().is_some());

    // The confirmation went out before the nested clear failed.
    assert_eq!(shop.notifier.sent_of(NotificationKind::OrderConfirmation).len(), 1);
}

// ---------------------------------------------------------------------------
// Order lifecycle
// ---------------------------------------------------------------------------

async fn placed_order(shop: &Shop, product_id: AggregateId, quantity: u32) -> AggregateId {
    let cart_id = AggregateId::new();
    shop.add(cart_id, CustomerId::new(), product_id, quantity).await;
    shop.dispatcher
        .send(PlaceOrder::new(cart_id))
        .await
        .unwrap()
        .order_id
}

#[tokio::test]
async fn test_cancel_releases_stock_and_notifies() {
    let shop = setup();
    let lamp = shop.product("SKU-LAMP", 4_500, 10).await;
    let order_id = placed_order(&shop, lamp, 4).await;
    assert_eq!(shop.stock(lamp).await, 6);

    let order = shop
        .dispatcher
        .send(CancelOrder {
            order_id,
            reason: "changed my mind".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(shop.stock(lamp).await, 10);

    let cancelled = shop.notifier.sent_of(NotificationKind::OrderCancelled);
    assert_eq!(cancelled.len(), 1);
    assert!(cancelled[0].message.contains("changed my mind"));
}

#[tokio::test]
async fn test_cancel_requires_a_reason() {
    let shop = setup();
    let lamp = shop.product("SKU-LAMP", 4_500, 10).await;
    let order_id = placed_order(&shop, lamp, 1).await;

    let result = shop
        .dispatcher
        .send(CancelOrder {
            order_id,
            reason: String::new(),
        })
        .await;

    assert!(matches!(result, Err(DispatchError::Validation(_))));
    assert_eq!(shop.stock(lamp).await, 9);
}

#[tokio::test]
async fn test_order_is_paid_then_shipped() {
    let shop = setup();
    let lamp = shop.product("SKU-LAMP", 4_500, 10).await;
    let order_id = placed_order(&shop, lamp, 1).await;

    let paid = shop.dispatcher.send(PayOrder { order_id }).await.unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);

    let shipped = shop.dispatcher.send(ShipOrder { order_id }).await.unwrap();
    assert_eq!(shipped.status, OrderStatus::Shipped);

    let kinds: Vec<_> = shop.notifier.sent().iter().map(|n| n.kind).collect();
    assert_eq!(
        kinds,
        vec![
            NotificationKind::OrderConfirmation,
            NotificationKind::PaymentReceived,
            NotificationKind::OrderShipped,
        ]
    );
}

#[tokio::test]
async fn test_shipping_unpaid_order_fails() {
    let shop = setup();
    let lamp = shop.product("SKU-LAMP", 4_500, 10).await;
    let order_id = placed_order(&shop, lamp, 1).await;

    let result = shop.dispatcher.send(ShipOrder { order_id }).await;

    assert!(matches!(
        result,
        Err(DispatchError::Domain(DomainError::Order(
            OrderError::InvalidStatusTransition { .. }
        )))
    ));
    let order = shop.dispatcher.send(GetOrder { order_id }).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Placed);
}
