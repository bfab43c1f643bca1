//! The find-and-modify operation and its two executors.
//!
//! A trusted process owns an [`AuthoritativeExecutor`], which hands the whole operation to the
//! store's atomic command. An untrusted replica owns an [`OptimisticExecutor`], which predicts
//! the outcome with a read followed by a separate write. The choice is made once, when the
//! [`Executor`] is built.

mod authoritative;
mod optimistic;

pub use authoritative::AuthoritativeExecutor;
pub use optimistic::OptimisticExecutor;

use crate::context::{ExecutionContext, ExecutionMode};
use crate::error::Result;
use crate::obs::logger::LoggerAndTracer;
use crate::obs::metrics::{Counter, Histogram, MetricRegistry};
use crate::options::options::{ExecutorKind, ExecutorOptions, Options};
use crate::request::FindAndModifyRequest;
use crate::info;
use crate::store::{NamedCollection, NativeCollection, NativeResult, PrimitiveCollection};
use bson::Document;
use std::fmt;
use std::sync::Arc;

/// Finds a document matching a query and modifies or removes it.
pub trait FindAndModify: Send + Sync {
    /// Validates `request`, then executes it.
    ///
    /// With `raw_result`, an executor able to do so returns the store's full reply instead of
    /// the document.
    fn find_and_modify(
        &self,
        request: Option<&FindAndModifyRequest>,
        raw_result: bool,
        context: ExecutionContext,
    ) -> Result<FindAndModifyOutput>;

    /// Same as [`find_and_modify`](Self::find_and_modify), reading the request from an
    /// untyped argument document.
    fn find_and_modify_args(
        &self,
        args: Option<&Document>,
        raw_result: bool,
        context: ExecutionContext,
    ) -> Result<FindAndModifyOutput> {
        let request = args.map(FindAndModifyRequest::from_document).transpose()?;
        self.find_and_modify(request.as_ref(), raw_result, context)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FindAndModifyOutput {
    /// The document before or after the modification, or nothing when no document matched.
    Value(Option<Document>),
    /// The store's reply, when raw output was requested from the native command.
    Raw(NativeResult),
}

impl FindAndModifyOutput {
    pub fn value(&self) -> Option<&Document> {
        match self {
            FindAndModifyOutput::Value(value) => value.as_ref(),
            FindAndModifyOutput::Raw(result) => result.value.as_ref(),
        }
    }

    pub fn into_value(self) -> Option<Document> {
        match self {
            FindAndModifyOutput::Value(value) => value,
            FindAndModifyOutput::Raw(result) => result.value,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, FindAndModifyOutput::Raw(_))
    }
}

/// The path an execution took.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Branch {
    Remove,
    UpsertInsert,
    Update,
    NoMatch,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Branch::Remove => "remove",
            Branch::UpsertInsert => "upsert_insert",
            Branch::Update => "update",
            Branch::NoMatch => "no_match",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone)]
pub(crate) struct Metrics {
    /// Number of calls handed to the native command
    pub authoritative: Arc<Counter>,

    pub remove: Arc<Counter>,

    /// Number of upserts that inserted a new document
    pub upsert_insert: Arc<Counter>,

    pub update: Arc<Counter>,

    /// Number of calls for which no document matched and nothing was inserted
    pub no_match: Arc<Counter>,

    /// Time spent waiting for the native command, in microseconds
    pub native_duration: Arc<Histogram>,
}

impl Metrics {
    pub fn new() -> Metrics {
        Self {
            authoritative: Counter::new(),
            remove: Counter::new(),
            upsert_insert: Counter::new(),
            update: Counter::new(),
            no_match: Counter::new(),
            native_duration: Histogram::new_time_histogram(),
        }
    }

    pub fn register_to(&self, metric_registry: &mut MetricRegistry) {
        metric_registry
            .register_counter("find_and_modify.authoritative", self.authoritative.clone())
            .register_counter("find_and_modify.remove", self.remove.clone())
            .register_counter("find_and_modify.upsert_insert", self.upsert_insert.clone())
            .register_counter("find_and_modify.update", self.update.clone())
            .register_counter("find_and_modify.no_match", self.no_match.clone())
            .register_histogram("find_and_modify.native.duration", self.native_duration.clone());
    }

    pub fn record(&self, branch: Branch) {
        match branch {
            Branch::Remove => self.remove.inc(),
            Branch::UpsertInsert => self.upsert_insert.inc(),
            Branch::Update => self.update.inc(),
            Branch::NoMatch => self.no_match.inc(),
        }
    }
}

/// The executor chosen for this process.
pub enum Executor {
    Authoritative(AuthoritativeExecutor),
    Optimistic(OptimisticExecutor),
}

impl Executor {
    pub fn authoritative(
        collection: Arc<dyn NativeCollection>,
        options: &ExecutorOptions,
        logger: Arc<dyn LoggerAndTracer>,
        metric_registry: &mut MetricRegistry,
    ) -> Self {
        Executor::Authoritative(AuthoritativeExecutor::new(collection, options, logger, metric_registry))
    }

    pub fn optimistic(
        collection: Arc<dyn PrimitiveCollection>,
        options: &ExecutorOptions,
        logger: Arc<dyn LoggerAndTracer>,
        metric_registry: &mut MetricRegistry,
    ) -> Self {
        Executor::Optimistic(OptimisticExecutor::new(collection, options, logger, metric_registry))
    }

    /// Builds the executor selected by `options` over a collection offering both capability
    /// sets.
    pub fn new<C>(
        options: &Options,
        collection: Arc<C>,
        logger: Arc<dyn LoggerAndTracer>,
        metric_registry: &mut MetricRegistry,
    ) -> Self
    where
        C: NativeCollection + PrimitiveCollection + 'static,
    {
        let executor_options = options.executor_options();
        info!(logger, "Serving findAndModify on {} with the {:?} executor",
            collection.name().unwrap_or("<unnamed>"), executor_options.mode());
        match executor_options.mode() {
            ExecutorKind::Authoritative => {
                Self::authoritative(collection, executor_options, logger, metric_registry)
            }
            ExecutorKind::Optimistic => {
                Self::optimistic(collection, executor_options, logger, metric_registry)
            }
        }
    }

    pub fn kind(&self) -> ExecutorKind {
        match self {
            Executor::Authoritative(_) => ExecutorKind::Authoritative,
            Executor::Optimistic(_) => ExecutorKind::Optimistic,
        }
    }

    /// The mode a call made with `context` runs in.
    pub fn mode(&self, context: ExecutionContext) -> ExecutionMode {
        match self {
            Executor::Authoritative(_) => ExecutionMode::Authoritative,
            Executor::Optimistic(_) => ExecutionMode::optimistic(context),
        }
    }
}

impl FindAndModify for Executor {
    fn find_and_modify(
        &self,
        request: Option<&FindAndModifyRequest>,
        raw_result: bool,
        context: ExecutionContext,
    ) -> Result<FindAndModifyOutput> {
        match self {
            Executor::Authoritative(executor) => executor.find_and_modify(request, raw_result, context),
            Executor::Optimistic(executor) => executor.find_and_modify(request, raw_result, context),
        }
    }
}
