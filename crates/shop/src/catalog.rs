//! Catalog requests: listing products, repricing and browsing.

use async_trait::async_trait;
use common::AggregateId;
use domain::{Aggregate, Money, Product, ProductId};
use pipeline::{DispatchResult, Request, RequestContext, RequestHandler, RequestKind, RuleSet};
use serde::Serialize;

/// Product as shown to shoppers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductView {
    pub product_id: AggregateId,
    pub sku: ProductId,
    pub name: String,
    pub price: Money,
    pub stock: u32,
}

impl From<&Product> for ProductView {
    fn from(product: &Product) -> Self {
        Self {
            product_id: product.id(),
            sku: product.sku().clone(),
            name: product.name().to_string(),
            price: product.price(),
            stock: product.stock(),
        }
    }
}

/// Lists a new product.
#[derive(Debug, Clone)]
pub struct CreateProduct {
    pub product_id: AggregateId,
    pub sku: String,
    pub name: String,
    pub price: Money,
    pub stock: u32,
}

impl CreateProduct {
    pub fn new(sku: impl Into<String>, name: impl Into<String>, price: Money, stock: u32) -> Self {
        Self {
            product_id: AggregateId::new(),
            sku: sku.into(),
            name: name.into(),
            price,
            stock,
        }
    }

    pub fn rules() -> RuleSet<Self> {
        RuleSet::new()
            .rule("sku_present", "sku must not be empty", |r: &Self| {
                !r.sku.trim().is_empty()
            })
            .rule("name_present", "name must not be empty", |r: &Self| {
                !r.name.trim().is_empty()
            })
            .rule("price_positive", "price must be positive", |r: &Self| {
                r.price.is_positive()
            })
    }
}

impl Request for CreateProduct {
    type Response = AggregateId;
    const KIND: RequestKind = RequestKind::Write;
}

/// Sets a new unit price. Carts keep the price an item was added at.
#[derive(Debug, Clone)]
pub struct ChangePrice {
    pub product_id: AggregateId,
    pub price: Money,
}

impl ChangePrice {
    pub fn rules() -> RuleSet<Self> {
        RuleSet::new().rule("price_positive", "price must be positive", |r: &Self| {
            r.price.is_positive()
        })
    }
}

impl Request for ChangePrice {
    type Response = ProductView;
    const KIND: RequestKind = RequestKind::Write;
}

#[derive(Debug, Clone)]
pub struct GetProduct {
    pub product_id: AggregateId,
}

impl Request for GetProduct {
    type Response = Option<ProductView>;
    const KIND: RequestKind = RequestKind::Read;
}

/// Every committed product, ordered by SKU.
#[derive(Debug, Clone, Default)]
pub struct ListProducts;

impl Request for ListProducts {
    type Response = Vec<ProductView>;
    const KIND: RequestKind = RequestKind::Read;
}

pub struct CreateProductHandler;

#[async_trait]
impl RequestHandler<CreateProduct> for CreateProductHandler {
    async fn handle(
        &self,
        request: CreateProduct,
        ctx: &mut RequestContext,
    ) -> DispatchResult<AggregateId> {
        let product = Product::list(
            request.product_id,
            request.sku,
            request.name,
            request.price,
            request.stock,
        )?;
        ctx.track(product)?;
        ctx.flush().await?;

        tracing::debug!(product_id = %request.product_id, "product listed");
        Ok(request.product_id)
    }
}

pub struct ChangePriceHandler;

#[async_trait]
impl RequestHandler<ChangePrice> for ChangePriceHandler {
    async fn handle(
        &self,
        request: ChangePrice,
        ctx: &mut RequestContext,
    ) -> DispatchResult<ProductView> {
        let product = ctx.load::<Product>(request.product_id).await?;
        ctx.get_mut(product)?.change_price(request.price)?;
        ctx.flush().await?;

        Ok(ProductView::from(ctx.get(product)?))
    }
}

pub struct GetProductHandler;

#[async_trait]
impl RequestHandler<GetProduct> for GetProductHandler {
    async fn handle(
        &self,
        request: GetProduct,
        ctx: &mut RequestContext,
    ) -> DispatchResult<Option<ProductView>> {
        match ctx.find::<Product>(request.product_id).await? {
            Some(product) => Ok(Some(ProductView::from(ctx.get(product)?))),
            None => Ok(None),
        }
    }
}

pub struct ListProductsHandler;

#[async_trait]
impl RequestHandler<ListProducts> for ListProductsHandler {
    async fn handle(
        &self,
        _request: ListProducts,
        ctx: &mut RequestContext,
    ) -> DispatchResult<Vec<ProductView>> {
        let handles = ctx.load_all::<Product>().await?;

        let mut views = handles
            .into_iter()
            .map(|product| ctx.get(product).map(ProductView::from))
            .collect::<DispatchResult<Vec<_>>>()?;
        views.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(views)
    }
}
