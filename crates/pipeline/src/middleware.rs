//! Middleware chain composed around every request handler.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::context::RequestContext;
use crate::error::DispatchResult;
use crate::handler::Endpoint;
use crate::request::{BoxResponse, RequestEnvelope};

/// A pipeline stage wrapping the rest of the chain.
///
/// Stages receive the type-erased request and decide whether and how to call
/// [`Next::run`]. The dispatcher composes `[ValidationStage, TransactionStage]`
/// followed by any extra layers, ending with the request's handler.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Stage name used in tracing spans.
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        request: RequestEnvelope,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> DispatchResult<BoxResponse>;
}

/// The remainder of the chain after the current stage.
pub struct Next<'a> {
    middleware: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub(crate) fn new(middleware: &'a [Arc<dyn Middleware>], endpoint: &'a dyn Endpoint) -> Self {
        Self {
            middleware,
            endpoint,
        }
    }

    /// Runs the next stage, or the handler once every stage has run.
    pub fn run<'c>(
        self,
        request: RequestEnvelope,
        ctx: &'c mut RequestContext,
    ) -> BoxFuture<'c, DispatchResult<BoxResponse>>
    where
        'a: 'c,
    {
        match self.middleware.split_first() {
            Some((current, rest)) => {
                tracing::trace!(stage = current.name(), request = request.name(), "entering stage");
                current.handle(request, ctx, Next::new(rest, self.endpoint))
            }
            None => self.endpoint.call(request, ctx),
        }
    }
}

/// Records every request that reaches the layer at debug level.
///
/// Useful as an extra layer after the built-in stages.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLayer;

#[async_trait]
impl Middleware for TracingLayer {
    fn name(&self) -> &'static str {
        "tracing"
    }

    async fn handle(
        &self,
        request: RequestEnvelope,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> DispatchResult<BoxResponse> {
        let name = request.name();
        let kind = request.kind();
        let in_transaction = ctx.transaction().is_some();

        let result = next.run(request, ctx).await;
        tracing::debug!(
            request = name,
            %kind,
            in_transaction,
            depth = ctx.depth(),
            succeeded = result.is_ok(),
            "request handled"
        );
        result
    }
}
