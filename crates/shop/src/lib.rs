//! Cart, order and catalog features wired through the request pipeline.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pipeline::Dispatcher;
//! use shop::{InMemoryNotifier, LowStockMonitor};
//! use store::InMemoryStore;
//!
//! let dispatcher = shop::register(
//!     Dispatcher::builder(Arc::new(InMemoryStore::new())),
//!     Arc::new(InMemoryNotifier::new()),
//!     LowStockMonitor::default(),
//! )
//! .build()
//! .unwrap();
//! ```

pub mod cart;
pub mod catalog;
pub mod error;
pub mod notifier;
pub mod orders;
pub mod reactions;

use std::sync::Arc;

use domain::{Cart, Order, OrderEvent, Product, ProductEvent};
use pipeline::DispatcherBuilder;

pub use cart::{AddCartItem, CartView, ClearCart, GetCart, RemoveCartItem};
pub use catalog::{ChangePrice, CreateProduct, GetProduct, ListProducts, ProductView};
pub use error::NotifyError;
pub use notifier::{InMemoryNotifier, Notification, NotificationKind, Notifier};
pub use orders::{CancelOrder, GetOrder, OrderView, PayOrder, PlaceOrder, ShipOrder};
pub use reactions::{CustomerNotifier, LowStockAlert, LowStockMonitor};

/// Registers every shop aggregate, request handler, rule set and event
/// handler on the builder.
pub fn register(
    builder: DispatcherBuilder,
    notifier: Arc<dyn Notifier>,
    monitor: LowStockMonitor,
) -> DispatcherBuilder {
    builder
        .aggregate::<Cart>()
        .aggregate::<Order>()
        .aggregate::<Product>()
        // Catalog
        .handler::<CreateProduct, _>(catalog::CreateProductHandler)
        .handler::<ChangePrice, _>(catalog::ChangePriceHandler)
        .handler::<GetProduct, _>(catalog::GetProductHandler)
        .handler::<ListProducts, _>(catalog::ListProductsHandler)
        .rules(CreateProduct::rules())
        .rules(ChangePrice::rules())
        // Cart
        .handler::<AddCartItem, _>(cart::AddCartItemHandler)
        .handler::<RemoveCartItem, _>(cart::RemoveCartItemHandler)
        .handler::<ClearCart, _>(cart::ClearCartHandler)
        .handler::<GetCart, _>(cart::GetCartHandler)
        .rules(AddCartItem::rules())
        .rules(RemoveCartItem::rules())
        // Orders
        .handler::<PlaceOrder, _>(orders::PlaceOrderHandler)
        .handler::<PayOrder, _>(orders::PayOrderHandler)
        .handler::<ShipOrder, _>(orders::ShipOrderHandler)
        .handler::<CancelOrder, _>(orders::CancelOrderHandler)
        .handler::<GetOrder, _>(orders::GetOrderHandler)
        .rules(CancelOrder::rules())
        // Reactions
        .subscribe::<OrderEvent, _>(CustomerNotifier::new(notifier))
        .subscribe::<ProductEvent, _>(monitor)
}
