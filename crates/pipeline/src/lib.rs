//! Transactional request pipeline.
//!
//! Every request sent through the [`Dispatcher`] passes a validation stage and
//! a transaction stage before it reaches its handler. Write requests run in an
//! ambient transaction; events raised by aggregates are drained when the
//! handler flushes its [`Session`] and delivered to in-process
//! [`EventHandler`]s before the transaction commits.

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod publisher;
pub mod request;
pub mod session;
pub mod transaction;
pub mod validation;

pub use config::{PipelineConfig, PublishPolicy};
pub use context::RequestContext;
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::{BoxError, ConfigurationError, DispatchError, DispatchResult};
pub use handler::RequestHandler;
pub use middleware::{Middleware, Next, TracingLayer};
pub use publisher::{EventHandler, EventPublisher, EventPublisherBuilder, PublishedEvent};
pub use request::{BoxResponse, Request, RequestEnvelope, RequestKind};
pub use session::{Handle, Session};
pub use transaction::{AmbientTransaction, TransactionScope, TransactionStage};
pub use validation::{RuleFailure, RuleSet, ValidationError, ValidationStage};

pub use tokio_util::sync::CancellationToken;
