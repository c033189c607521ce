//! Request dispatcher and its startup registry.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use domain::{Aggregate, DomainEvent};
use metrics::{counter, histogram};
use store::{Store, TransactionOptions};
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::context::RequestContext;
use crate::error::{ConfigurationError, DispatchResult};
use crate::handler::{Endpoint, HandlerEndpoint, RequestHandler};
use crate::middleware::{Middleware, Next};
use crate::publisher::{EventHandler, EventPublisher, EventPublisherBuilder};
use crate::request::{Request, RequestEnvelope};
use crate::transaction::TransactionStage;
use crate::validation::{ErasedRuleSet, RuleSet, ValidationStage};

struct Inner {
    routes: HashMap<TypeId, Arc<dyn Endpoint>>,
    middleware: Vec<Arc<dyn Middleware>>,
    publisher: Arc<EventPublisher>,
    store: Arc<dyn Store>,
    config: PipelineConfig,
}

/// Routes each request to its single handler through the middleware chain.
///
/// The chain is `[ValidationStage, TransactionStage]` followed by the layers
/// added with [`DispatcherBuilder::layer`]. It is composed once by
/// [`DispatcherBuilder::build`]; a send only looks up the handler for the
/// request's type. Cloning is cheap and shares the registry.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn builder(store: Arc<dyn Store>) -> DispatcherBuilder {
        DispatcherBuilder::new(store)
    }

    /// Sends a request as the outermost unit of work.
    pub async fn send<R: Request>(&self, request: R) -> DispatchResult<R::Response> {
        self.send_with(request, CancellationToken::new()).await
    }

    /// Sends a request that stops at its next suspension point once `token`
    /// is cancelled. A write request cancelled after its transaction opened
    /// rolls back.
    pub async fn send_with<R: Request>(
        &self,
        request: R,
        token: CancellationToken,
    ) -> DispatchResult<R::Response> {
        let mut ctx = RequestContext::root::<R>(self.clone(), token);
        self.dispatch(request, &mut ctx).await
    }

    #[tracing::instrument(
        name = "dispatch",
        skip_all,
        fields(request = R::name(), kind = R::KIND.as_str(), depth = ctx.depth())
    )]
    pub(crate) async fn dispatch<R: Request>(
        &self,
        request: R,
        ctx: &mut RequestContext,
    ) -> DispatchResult<R::Response> {
        let started = Instant::now();
        let result = self.run_chain(request, ctx).await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        counter!(
            "pipeline_requests_total",
            "request" => R::name(),
            "kind" => R::KIND.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        histogram!("pipeline_request_duration_seconds", "request" => R::name())
            .record(started.elapsed().as_secs_f64());

        result
    }

    async fn run_chain<R: Request>(
        &self,
        request: R,
        ctx: &mut RequestContext,
    ) -> DispatchResult<R::Response> {
        ctx.checkpoint()?;

        let endpoint = self
            .inner
            .routes
            .get(&TypeId::of::<R>())
            .ok_or(ConfigurationError::MissingHandler { request: R::name() })?;

        let response = Next::new(&self.inner.middleware, endpoint.as_ref())
            .run(RequestEnvelope::new(request), ctx)
            .await?;

        response
            .downcast::<R::Response>()
            .map(|response| *response)
            .map_err(|_| ConfigurationError::ResponseTypeMismatch { request: R::name() }.into())
    }

    /// Returns true if a handler is registered for `R`.
    pub fn handles<R: Request>(&self) -> bool {
        self.inner.routes.contains_key(&TypeId::of::<R>())
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    pub fn publisher(&self) -> Arc<EventPublisher> {
        Arc::clone(&self.inner.publisher)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stages: Vec<_> = self.inner.middleware.iter().map(|m| m.name()).collect();
        f.debug_struct("Dispatcher")
            .field("routes", &self.inner.routes.len())
            .field("stages", &stages)
            .field("publisher", &self.inner.publisher)
            .field("config", &self.inner.config)
            .finish()
    }
}

struct RuleEntry {
    request: &'static str,
    rule_sets: Vec<Arc<dyn ErasedRuleSet>>,
}

/// Startup registration of handlers, rules, aggregates and event handlers.
///
/// Registration mistakes are reported by [`build`](Self::build) rather than
/// at the first send.
pub struct DispatcherBuilder {
    store: Arc<dyn Store>,
    config: PipelineConfig,
    routes: HashMap<TypeId, Arc<dyn Endpoint>>,
    duplicates: Vec<&'static str>,
    rules: HashMap<TypeId, RuleEntry>,
    publisher: EventPublisherBuilder,
    layers: Vec<Arc<dyn Middleware>>,
}

impl DispatcherBuilder {
    fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            config: PipelineConfig::default(),
            routes: HashMap::new(),
            duplicates: Vec::new(),
            rules: HashMap::new(),
            publisher: EventPublisher::builder(),
            layers: Vec::new(),
        }
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers the handler for `R`. Each request type takes exactly one.
    pub fn handler<R, H>(mut self, handler: H) -> Self
    where
        R: Request,
        H: RequestHandler<R>,
    {
        let endpoint: Arc<dyn Endpoint> = Arc::new(HandlerEndpoint::<R, H>::new(handler));
        if self.routes.insert(TypeId::of::<R>(), endpoint).is_some() {
            self.duplicates.push(R::name());
        }
        self
    }

    /// Adds validation rules for `R`. Repeated calls accumulate.
    pub fn rules<R: Request>(mut self, rules: RuleSet<R>) -> Self {
        self.rules
            .entry(TypeId::of::<R>())
            .or_insert_with(|| RuleEntry {
                request: R::name(),
                rule_sets: Vec::new(),
            })
            .rule_sets
            .push(Arc::new(rules));
        self
    }

    /// Declares an aggregate type whose events may be published.
    pub fn aggregate<A: Aggregate>(mut self) -> Self {
        self.publisher = self.publisher.declare::<A::Event>();
        self
    }

    /// Appends an event handler. Handlers for one event type run in the
    /// order they were subscribed.
    pub fn subscribe<E, H>(mut self, handler: H) -> Self
    where
        E: DomainEvent,
        H: EventHandler<E>,
    {
        self.publisher = self.publisher.subscribe::<E, H>(handler);
        self
    }

    /// Appends a stage after the built-in validation and transaction stages.
    pub fn layer(mut self, middleware: impl Middleware + 'static) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    pub fn build(self) -> Result<Dispatcher, ConfigurationError> {
        if self.config.transaction_timeout.is_zero() {
            return Err(ConfigurationError::ZeroTimeout);
        }

        if let Some(request) = self.duplicates.first().copied() {
            return Err(ConfigurationError::DuplicateHandler { request });
        }

        if let Some((_, entry)) = self
            .rules
            .iter()
            .find(|(type_id, _)| !self.routes.contains_key(*type_id))
        {
            return Err(ConfigurationError::RulesWithoutHandler {
                request: entry.request,
            });
        }

        let publisher = Arc::new(self.publisher.build()?);

        let rules = self
            .rules
            .into_iter()
            .map(|(type_id, entry)| (type_id, entry.rule_sets))
            .collect();

        let transaction = TransactionStage::new(
            Arc::clone(&self.store),
            TransactionOptions::with_isolation(self.config.isolation),
            self.config.transaction_timeout,
            self.config.publish_policy,
        );

        let mut middleware: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(ValidationStage::new(rules)),
            Arc::new(transaction),
        ];
        middleware.extend(self.layers);

        tracing::debug!(
            routes = self.routes.len(),
            stages = middleware.len(),
            "dispatcher built"
        );

        Ok(Dispatcher {
            inner: Arc::new(Inner {
                routes: self.routes,
                middleware,
                publisher,
                store: self.store,
                config: self.config,
            }),
        })
    }
}
