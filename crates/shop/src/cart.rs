//! Shopping cart requests.

use async_trait::async_trait;
use common::AggregateId;
use domain::{Aggregate, Cart, CustomerId, LineItem, Money, Product, ProductId};
use pipeline::{DispatchResult, Request, RequestContext, RequestHandler, RequestKind, RuleSet};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartView {
    pub cart_id: AggregateId,
    pub customer_id: CustomerId,
    pub lines: Vec<LineItem>,
    pub total_quantity: u32,
    pub total: Money,
}

impl From<&Cart> for CartView {
    fn from(cart: &Cart) -> Self {
        Self {
            cart_id: cart.id(),
            customer_id: cart.customer_id(),
            lines: cart.items().cloned().collect(),
            total_quantity: cart.total_quantity(),
            total: cart.total(),
        }
    }
}

/// Adds a product to a cart at the product's current price, creating the
/// cart on first use.
#[derive(Debug, Clone)]
pub struct AddCartItem {
    pub cart_id: AggregateId,
    pub customer_id: CustomerId,
    pub product_id: AggregateId,
    pub quantity: u32,
}

impl AddCartItem {
    pub fn rules() -> RuleSet<Self> {
        RuleSet::new().rule("positive_quantity", "quantity must be positive", |r: &Self| {
            r.quantity > 0
        })
    }
}

impl Request for AddCartItem {
    type Response = CartView;
    const KIND: RequestKind = RequestKind::Write;
}

#[derive(Debug, Clone)]
pub struct RemoveCartItem {
    pub cart_id: AggregateId,
    pub sku: ProductId,
}

impl RemoveCartItem {
    pub fn rules() -> RuleSet<Self> {
        RuleSet::new().rule("sku_present", "sku must not be empty", |r: &Self| {
            !r.sku.is_blank()
        })
    }
}

impl Request for RemoveCartItem {
    type Response = CartView;
    const KIND: RequestKind = RequestKind::Write;
}

/// Empties a cart and deletes it.
#[derive(Debug, Clone)]
pub struct ClearCart {
    pub cart_id: AggregateId,
}

impl Request for ClearCart {
    type Response = ();
    const KIND: RequestKind = RequestKind::Write;
}

#[derive(Debug, Clone)]
pub struct GetCart {
    pub cart_id: AggregateId,
}

impl Request for GetCart {
    type Response = Option<CartView>;
    const KIND: RequestKind = RequestKind::Read;
}

pub struct AddCartItemHandler;

#[async_trait]
impl RequestHandler<AddCartItem> for AddCartItemHandler {
    async fn handle(&self, request: AddCartItem, ctx: &mut RequestContext) -> DispatchResult<CartView> {
        let product = ctx.load::<Product>(request.product_id).await?;
        let item = {
            let product = ctx.get(product)?;
            LineItem::new(
                request.product_id,
                product.sku().clone(),
                product.name(),
                request.quantity,
                product.price(),
            )
        };

        let cart = match ctx.find::<Cart>(request.cart_id).await? {
            Some(cart) => cart,
            None => ctx.track(Cart::new(request.cart_id, request.customer_id))?,
        };
        ctx.get_mut(cart)?.add_item(item)?;
        ctx.flush().await?;

        Ok(CartView::from(ctx.get(cart)?))
    }
}

pub struct RemoveCartItemHandler;

#[async_trait]
impl RequestHandler<RemoveCartItem> for RemoveCartItemHandler {
    async fn handle(
        &self,
        request: RemoveCartItem,
        ctx: &mut RequestContext,
    ) -> DispatchResult<CartView> {
        let cart = ctx.load::<Cart>(request.cart_id).await?;
        ctx.get_mut(cart)?.remove_item(&request.sku)?;
        ctx.flush().await?;

        Ok(CartView::from(ctx.get(cart)?))
    }
}

pub struct ClearCartHandler;

#[async_trait]
impl RequestHandler<ClearCart> for ClearCartHandler {
    async fn handle(&self, request: ClearCart, ctx: &mut RequestContext) -> DispatchResult<()> {
        let cart = ctx.load::<Cart>(request.cart_id).await?;
        ctx.get_mut(cart)?.clear();
        ctx.remove(cart)?;
        ctx.flush().await?;
        Ok(())
    }
}

pub struct GetCartHandler;

#[async_trait]
impl RequestHandler<GetCart> for GetCartHandler {
    async fn handle(
        &self,
        request: GetCart,
        ctx: &mut RequestContext,
    ) -> DispatchResult<Option<CartView>> {
        match ctx.find::<Cart>(request.cart_id).await? {
            Some(cart) => Ok(Some(CartView::from(ctx.get(cart)?))),
            None => Ok(None),
        }
    }
}
