//! Request trait and classification.

use std::any::{Any, TypeId};

/// Whether a request mutates state.
///
/// Write requests run inside an ambient transaction. Read requests pass the
/// transaction stage untouched and may not persist changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Write,
    Read,
}

impl RequestKind {
    pub fn is_write(&self) -> bool {
        matches!(self, RequestKind::Write)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Write => "write",
            RequestKind::Read => "read",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work sent through the dispatcher.
///
/// Each request type declares its kind explicitly and has exactly one
/// registered [`RequestHandler`](crate::RequestHandler).
///
/// ```
/// use pipeline::{Request, RequestKind};
///
/// struct RenameProduct {
///     name: String,
/// }
///
/// impl Request for RenameProduct {
///     type Response = ();
///     const KIND: RequestKind = RequestKind::Write;
/// }
/// # assert_eq!(RenameProduct::name(), "RenameProduct");
/// ```
pub trait Request: Send + 'static {
    /// The value returned to the caller on success.
    type Response: Send + 'static;

    /// Write or read classification.
    const KIND: RequestKind;

    /// Returns the request type name used in errors, logs and metrics.
    fn name() -> &'static str {
        short_type_name::<Self>()
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Type-erased response travelling back up the middleware chain.
pub type BoxResponse = Box<dyn Any + Send>;

/// Type-erased request travelling down the middleware chain.
pub struct RequestEnvelope {
    payload: Box<dyn Any + Send>,
    type_id: TypeId,
    name: &'static str,
    kind: RequestKind,
}

impl RequestEnvelope {
    pub fn new<R: Request>(request: R) -> Self {
        Self {
            payload: Box::new(request),
            type_id: TypeId::of::<R>(),
            name: R::name(),
            kind: R::KIND,
        }
    }

    /// The concrete request type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Borrows the payload as its concrete type.
    pub fn downcast_ref<R: Request>(&self) -> Option<&R> {
        self.payload.downcast_ref::<R>()
    }

    /// Borrows the payload without naming its type.
    pub fn payload(&self) -> &(dyn Any + Send) {
        self.payload.as_ref()
    }

    /// Unwraps the payload into its concrete type.
    pub fn into_inner<R: Request>(self) -> Result<R, Self> {
        let Self {
            payload,
            type_id,
            name,
            kind,
        } = self;

        payload.downcast::<R>().map(|request| *request).map_err(|payload| Self {
            payload,
            type_id,
            name,
            kind,
        })
    }
}

impl std::fmt::Debug for RequestEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEnvelope")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
