//! Request handler trait and its type-erased endpoint.

use std::marker::PhantomData;

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::{ConfigurationError, DispatchResult};
use crate::request::{BoxResponse, Request, RequestEnvelope};

/// Handles one request type.
///
/// Handlers are the only code that mutates aggregates. They load and track
/// aggregates through the context's session and call
/// [`RequestContext::flush`] to persist them.
#[async_trait]
pub trait RequestHandler<R: Request>: Send + Sync + 'static {
    async fn handle(&self, request: R, ctx: &mut RequestContext) -> DispatchResult<R::Response>;
}

/// The end of the middleware chain.
#[async_trait]
pub(crate) trait Endpoint: Send + Sync {
    async fn call(
        &self,
        request: RequestEnvelope,
        ctx: &mut RequestContext,
    ) -> DispatchResult<BoxResponse>;
}

/// Adapts a typed handler to the erased chain.
pub(crate) struct HandlerEndpoint<R, H> {
    handler: H,
    _request: PhantomData<fn(R)>,
}

impl<R, H> HandlerEndpoint<R, H> {
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _request: PhantomData,
        }
    }
}

#[async_trait]
impl<R, H> Endpoint for HandlerEndpoint<R, H>
where
    R: Request,
    H: RequestHandler<R>,
{
    async fn call(
        &self,
        request: RequestEnvelope,
        ctx: &mut RequestContext,
    ) -> DispatchResult<BoxResponse> {
        let name = request.name();
        let request = request
            .into_inner::<R>()
            .map_err(|_| ConfigurationError::MissingHandler { request: name })?;

        let response = self.handler.handle(request, ctx).await?;
        Ok(Box::new(response))
    }
}
