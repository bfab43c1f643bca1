use crate::context::{ExecutionContext, ExecutionMode};
use crate::error::{Error, Result};
use crate::executor::{Branch, FindAndModify, FindAndModifyOutput, Metrics};
use crate::obs::logger::LoggerAndTracer;
use crate::obs::metrics::MetricRegistry;
use crate::options::options::ExecutorOptions;
use crate::request::FindAndModifyRequest;
use crate::store::{PrimitiveCollection, ReadOptions};
use crate::validate::validate;
use crate::{debug, event, warn};
use bson::{doc, Bson, Document};
use std::sync::Arc;

/// Predicts the outcome of find-and-modify with a read followed by a separate write.
///
/// The read and the write are not atomic: another writer may change the matched document in
/// between. The prediction is corrected once the authoritative result comes back.
pub struct OptimisticExecutor {
    collection: Arc<dyn PrimitiveCollection>,
    sorted_upsert_placeholder: bool,
    logger: Arc<dyn LoggerAndTracer>,
    metrics: Metrics,
}

impl OptimisticExecutor {
    pub fn new(
        collection: Arc<dyn PrimitiveCollection>,
        options: &ExecutorOptions,
        logger: Arc<dyn LoggerAndTracer>,
        metric_registry: &mut MetricRegistry,
    ) -> Self {
        let metrics = Metrics::new();
        metrics.register_to(metric_registry);
        OptimisticExecutor {
            collection,
            sorted_upsert_placeholder: options.sorted_upsert_placeholder(),
            logger,
            metrics,
        }
    }

    fn execute(
        &self,
        request: &FindAndModifyRequest,
        context: ExecutionContext,
    ) -> Result<(Branch, Option<Document>)> {
        let query = request.query.clone().unwrap_or_default();
        let update = request.update.clone().unwrap_or_default();
        let read_options = ReadOptions {
            sort: request.sort.clone(),
            fields: request.fields.clone(),
            skip: request.skip,
        };

        let predicted = self.collection.read_one(&query, &read_options)?;

        if request.is_remove() {
            return match predicted {
                Some(doc) => {
                    let id = identity(&doc)?;
                    self.collection.remove_by_id(&id)?;
                    Ok((Branch::Remove, Some(doc)))
                }
                None => Ok((Branch::NoMatch, None)),
            };
        }

        let Some(predicted) = predicted else {
            if !request.is_upsert() {
                return Ok((Branch::NoMatch, None));
            }

            let result = self.collection.upsert(&query, &update)?;
            // A document inserted by another writer since the read may have been updated instead.
            let branch = match result.inserted_id {
                Some(_) => Branch::UpsertInsert,
                None => Branch::Update,
            };
            let value = match result.inserted_id {
                Some(id) if request.is_return_new() => self.read_by_id(id, &read_options)?,
                _ if request.sort.is_some() && self.sorted_upsert_placeholder => Some(Document::new()),
                _ => None,
            };
            return Ok((branch, value));
        };

        let id = identity(&predicted)?;
        let selector = if context.nested_simulation {
            let mut selector = query;
            selector.insert("_id", id.clone());
            selector
        } else {
            doc! { "_id": id.clone() }
        };
        debug!(self.logger, "Updating predicted document with selector {}", selector);
        self.collection.update_by_selector(&selector, &update)?;

        let value = if request.is_return_new() {
            self.read_by_id(id, &read_options)?
        } else {
            Some(predicted)
        };
        Ok((Branch::Update, value))
    }

    /// Reads a single document back by `_id`, projected like the initial read. Skipping does
    /// not apply to a lookup by identity.
    fn read_by_id(&self, id: Bson, read_options: &ReadOptions) -> Result<Option<Document>> {
        let options = ReadOptions {
            skip: None,
            ..read_options.clone()
        };
        Ok(self.collection.read_one(&doc! { "_id": id }, &options)?)
    }
}

fn identity(doc: &Document) -> Result<Bson> {
    doc.get("_id").cloned().ok_or(Error::MissingIdentity)
}

impl FindAndModify for OptimisticExecutor {
    fn find_and_modify(
        &self,
        request: Option<&FindAndModifyRequest>,
        _raw_result: bool,
        context: ExecutionContext,
    ) -> Result<FindAndModifyOutput> {
        let request = validate(self.collection.as_ref(), request)?;
        let mode = ExecutionMode::optimistic(context);

        let (branch, value) = match self.execute(request, context) {
            Ok(outcome) => outcome,
            Err(Error::MissingIdentity) => {
                warn!(self.logger, "The document matched by {:?} has no _id, nothing was written", request.query);
                return Err(Error::MissingIdentity);
            }
            Err(e) => return Err(e),
        };

        self.metrics.record(branch);
        event!(self.logger, "find_and_modify, mode={}, branch={}", mode, branch);
        Ok(FindAndModifyOutput::Value(value))
    }
}
