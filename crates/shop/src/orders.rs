//! Order requests: checkout, payment, shipment and cancellation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{Aggregate, Cart, CustomerId, LineItem, Money, Order, OrderStatus, Product};
use pipeline::{DispatchResult, Request, RequestContext, RequestHandler, RequestKind, RuleSet};
use serde::Serialize;

use crate::cart::ClearCart;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderView {
    pub order_id: AggregateId,
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    pub lines: Vec<LineItem>,
    pub total: Money,
    pub placed_at: DateTime<Utc>,
}

impl From<&Order> for OrderView {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id(),
            customer_id: order.customer_id(),
            status: order.status(),
            lines: order.lines().to_vec(),
            total: order.total(),
            placed_at: order.placed_at(),
        }
    }
}

/// Turns a cart into an order.
///
/// Reserves stock on every product in the cart, places the order, then
/// clears the cart with a nested request in the same transaction.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub order_id: AggregateId,
    pub cart_id: AggregateId,
}

impl PlaceOrder {
    pub fn new(cart_id: AggregateId) -> Self {
        Self {
            order_id: AggregateId::new(),
            cart_id,
        }
    }
}

impl Request for PlaceOrder {
    type Response = OrderView;
    const KIND: RequestKind = RequestKind::Write;
}

#[derive(Debug, Clone)]
pub struct PayOrder {
    pub order_id: AggregateId,
}

impl Request for PayOrder {
    type Response = OrderView;
    const KIND: RequestKind = RequestKind::Write;
}

#[derive(Debug, Clone)]
pub struct ShipOrder {
    pub order_id: AggregateId,
}

impl Request for ShipOrder {
    type Response = OrderView;
    const KIND: RequestKind = RequestKind::Write;
}

/// Cancels an order and returns its stock to the catalog.
#[derive(Debug, Clone)]
pub struct CancelOrder {
    pub order_id: AggregateId,
    pub reason: String,
}

impl CancelOrder {
    pub fn rules() -> RuleSet<Self> {
        RuleSet::new().rule("reason_present", "reason must not be empty", |r: &Self| {
            !r.reason.trim().is_empty()
        })
    }
}

impl Request for CancelOrder {
    type Response = OrderView;
    const KIND: RequestKind = RequestKind::Write;
}

#[derive(Debug, Clone)]
pub struct GetOrder {
    pub order_id: AggregateId,
}

impl Request for GetOrder {
    type Response = Option<OrderView>;
    const KIND: RequestKind = RequestKind::Read;
}

pub struct PlaceOrderHandler;

#[async_trait]
impl RequestHandler<PlaceOrder> for PlaceOrderHandler {
    async fn handle(&self, request: PlaceOrder, ctx: &mut RequestContext) -> DispatchResult<OrderView> {
        let cart = ctx.load::<Cart>(request.cart_id).await?;
        let (customer_id, lines) = {
            let cart = ctx.get(cart)?;
            (cart.customer_id(), cart.items().cloned().collect::<Vec<_>>())
        };

        for line in &lines {
            let product = ctx.load::<Product>(line.product).await?;
            ctx.get_mut(product)?.reserve(line.quantity, request.order_id)?;
        }

        let order = ctx.track(Order::place(request.order_id, customer_id, lines)?)?;
        ctx.flush().await?;

        ctx.send(ClearCart {
            cart_id: request.cart_id,
        })
        .await?;

        tracing::debug!(order_id = %request.order_id, cart_id = %request.cart_id, "order placed");
        Ok(OrderView::from(ctx.get(order)?))
    }
}

pub struct PayOrderHandler;

#[async_trait]
impl RequestHandler<PayOrder> for PayOrderHandler {
    async fn handle(&self, request: PayOrder, ctx: &mut RequestContext) -> DispatchResult<OrderView> {
        let order = ctx.load::<Order>(request.order_id).await?;
        ctx.get_mut(order)?.mark_paid()?;
        ctx.flush().await?;
        Ok(OrderView::from(ctx.get(order)?))
    }
}

pub struct ShipOrderHandler;

#[async_trait]
impl RequestHandler<ShipOrder> for ShipOrderHandler {
    async fn handle(&self, request: ShipOrder, ctx: &mut RequestContext) -> DispatchResult<OrderView> {
        let order = ctx.load::<Order>(request.order_id).await?;
        ctx.get_mut(order)?.ship()?;
        ctx.flush().await?;
        Ok(OrderView::from(ctx.get(order)?))
    }
}

pub struct CancelOrderHandler;

#[async_trait]
impl RequestHandler<CancelOrder> for CancelOrderHandler {
    async fn handle(
        &self,
        request: CancelOrder,
        ctx: &mut RequestContext,
    ) -> DispatchResult<OrderView> {
        let order = ctx.load::<Order>(request.order_id).await?;
        ctx.get_mut(order)?.cancel(request.reason)?;

        let lines = ctx.get(order)?.lines().to_vec();
        for line in &lines {
            let product = ctx.load::<Product>(line.product).await?;
            ctx.get_mut(product)?.release(line.quantity, request.order_id)?;
        }

        ctx.flush().await?;
        Ok(OrderView::from(ctx.get(order)?))
    }
}

pub struct GetOrderHandler;

#[async_trait]
impl RequestHandler<GetOrder> for GetOrderHandler {
    async fn handle(
        &self,
        request: GetOrder,
        ctx: &mut RequestContext,
    ) -> DispatchResult<Option<OrderView>> {
        match ctx.find::<Order>(request.order_id).await? {
            Some(order) => Ok(Some(OrderView::from(ctx.get(order)?))),
            None => Ok(None),
        }
    }
}
