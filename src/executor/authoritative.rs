use crate::command::NativeCommand;
use crate::context::{ExecutionContext, ExecutionMode};
use crate::error::Result;
use crate::executor::{Branch, FindAndModify, FindAndModifyOutput, Metrics};
use crate::obs::logger::LoggerAndTracer;
use crate::obs::metrics::MetricRegistry;
use crate::options::options::ExecutorOptions;
use crate::request::FindAndModifyRequest;
use crate::store::callback::BlockingCallback;
use crate::store::{NamedCollection, NativeCollection, NativeResult};
use crate::util::random_id::{IdGenerator, RandomIdGenerator};
use crate::validate::validate;
use crate::{debug, event};
use std::sync::Arc;
use std::time::Instant;

/// Executes find-and-modify through the store's atomic command.
pub struct AuthoritativeExecutor {
    collection: Arc<dyn NativeCollection>,
    id_generator: Arc<dyn IdGenerator>,
    logger: Arc<dyn LoggerAndTracer>,
    metrics: Metrics,
}

impl AuthoritativeExecutor {
    pub fn new(
        collection: Arc<dyn NativeCollection>,
        options: &ExecutorOptions,
        logger: Arc<dyn LoggerAndTracer>,
        metric_registry: &mut MetricRegistry,
    ) -> Self {
        let metrics = Metrics::new();
        metrics.register_to(metric_registry);
        AuthoritativeExecutor {
            collection,
            id_generator: Arc::new(RandomIdGenerator::new(options.id_length())),
            logger,
            metrics,
        }
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    fn branch_of(command: &NativeCommand, result: &NativeResult) -> Branch {
        let last_error_object = &result.last_error_object;
        if last_error_object.n == 0 {
            Branch::NoMatch
        } else if command.is_remove() {
            Branch::Remove
        } else if last_error_object.upserted.is_some() {
            Branch::UpsertInsert
        } else {
            Branch::Update
        }
    }
}

impl FindAndModify for AuthoritativeExecutor {
    fn find_and_modify(
        &self,
        request: Option<&FindAndModifyRequest>,
        raw_result: bool,
        _context: ExecutionContext,
    ) -> Result<FindAndModifyOutput> {
        let request = validate(self.collection.as_ref(), request)?;
        let name = self.collection.name().unwrap_or_default();

        let command = NativeCommand::from_request(request, self.id_generator.as_ref());
        debug!(self.logger, "Sending native command: {}", command.to_document(name));
        self.metrics.authoritative.inc();

        let start = Instant::now();
        let (callback, receiver) = BlockingCallback::new();
        self.collection.find_and_modify(command.clone(), callback);
        let result = receiver.await_blocking();
        self.metrics.native_duration.record(start.elapsed().as_micros() as u64);
        let result = result??;

        let branch = Self::branch_of(&command, &result);
        self.metrics.record(branch);
        event!(self.logger, "find_and_modify, mode={}, branch={}", ExecutionMode::Authoritative, branch);

        Ok(if raw_result {
            FindAndModifyOutput::Raw(result)
        } else {
            FindAndModifyOutput::Value(result.value)
        })
    }
}
