//! Validation rules and the stage that enforces them.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::context::RequestContext;
use crate::error::DispatchResult;
use crate::middleware::{Middleware, Next};
use crate::request::{BoxResponse, Request, RequestEnvelope};

/// A single failed rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
    pub rule: &'static str,
    pub message: String,
}

/// One or more validation rules failed for a request.
#[derive(Debug, Clone, Error)]
#[error("Validation failed for {request}: {}", summary(.failures))]
pub struct ValidationError {
    pub request: &'static str,
    pub failures: Vec<RuleFailure>,
}

fn summary(failures: &[RuleFailure]) -> String {
    failures
        .iter()
        .map(|f| f.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    /// Returns true if the named rule is among the failures.
    pub fn has_failure(&self, rule: &str) -> bool {
        self.failures.iter().any(|f| f.rule == rule)
    }
}

type Predicate<R> = Box<dyn Fn(&R) -> bool + Send + Sync>;

struct Rule<R> {
    name: &'static str,
    message: String,
    predicate: Predicate<R>,
}

/// Ordered list of predicate and message pairs for one request type.
///
/// ```
/// use pipeline::{Request, RequestKind, RuleSet};
///
/// struct AddItem {
///     quantity: u32,
/// }
///
/// impl Request for AddItem {
///     type Response = ();
///     const KIND: RequestKind = RequestKind::Write;
/// }
///
/// let rules = RuleSet::<AddItem>::new()
///     .rule("positive_quantity", "quantity must be positive", |r| r.quantity > 0);
///
/// assert!(rules.evaluate(&AddItem { quantity: 1 }).is_empty());
/// assert_eq!(rules.evaluate(&AddItem { quantity: 0 }).len(), 1);
/// ```
pub struct RuleSet<R> {
    rules: Vec<Rule<R>>,
}

impl<R> Default for RuleSet<R> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<R: Request> RuleSet<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule that passes when `predicate` returns true.
    pub fn rule(
        mut self,
        name: &'static str,
        message: impl Into<String>,
        predicate: impl Fn(&R) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.rules.push(Rule {
            name,
            message: message.into(),
            predicate: Box::new(predicate),
        });
        self
    }

    /// Evaluates every rule and returns the failures in declaration order.
    pub fn evaluate(&self, request: &R) -> Vec<RuleFailure> {
        self.rules
            .iter()
            .filter(|rule| !(rule.predicate)(request))
            .map(|rule| RuleFailure {
                rule: rule.name,
                message: rule.message.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Rule set with the request type erased.
pub(crate) trait ErasedRuleSet: Send + Sync {
    fn evaluate(&self, request: &(dyn Any + Send)) -> Vec<RuleFailure>;
}

impl<R: Request> ErasedRuleSet for RuleSet<R> {
    fn evaluate(&self, request: &(dyn Any + Send)) -> Vec<RuleFailure> {
        match request.downcast_ref::<R>() {
            Some(request) => RuleSet::<R>::evaluate(self, request),
            None => Vec::new(),
        }
    }
}

/// First stage of the chain: rejects invalid requests before any
/// transaction is opened.
#[derive(Default)]
pub struct ValidationStage {
    rules: HashMap<TypeId, Vec<Arc<dyn ErasedRuleSet>>>,
}

impl ValidationStage {
    pub(crate) fn new(rules: HashMap<TypeId, Vec<Arc<dyn ErasedRuleSet>>>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl Middleware for ValidationStage {
    fn name(&self) -> &'static str {
        "validation"
    }

    async fn handle(
        &self,
        request: RequestEnvelope,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> DispatchResult<BoxResponse> {
        if let Some(rule_sets) = self.rules.get(&request.type_id()) {
            let failures: Vec<RuleFailure> = rule_sets
                .iter()
                .flat_map(|rules| rules.evaluate(request.payload()))
                .collect();
            if !failures.is_empty() {
                tracing::debug!(
                    request = request.name(),
                    failed = failures.len(),
                    "request rejected by validation"
                );
                return Err(ValidationError {
                    request: request.name(),
                    failures,
                }
                .into());
            }
        }

        next.run(request, ctx).await
    }
}
