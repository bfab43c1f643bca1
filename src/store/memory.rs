use crate::command::NativeCommand;
use crate::obs::logger::{LoggerAndTracer, NoOpLogger};
use crate::query::execution::filters::{positional_index, to_filter, DocumentFilter};
use crate::query::execution::projections::{to_projector, Projector};
use crate::query::execution::sort::in_memory_sort;
use crate::query::execution::updates::{to_updater, UpdateContext};
use crate::query::parser::{parse_conditions, parse_projection, parse_sort, parse_update};
use crate::query::{Expr, SortField};
use crate::store::callback::Callback;
use crate::store::{
    LastErrorObject, NamedCollection, NativeCollection, NativeResult, PrimitiveCollection,
    ReadOptions, StoreError, StoreResult, UpsertResult,
};
use crate::util::bson_utils::BsonKey;
use crate::util::random_id::{IdGenerator, RandomIdGenerator};
use crate::{debug, error};
use bson::{doc, Bson, Document};
use crossbeam_skiplist::SkipMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

/// Number of writes kept in the journal by default. Older writes are dropped first.
pub const DEFAULT_JOURNAL_CAPACITY: usize = 1024;

/// Who is writing to the collection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessPolicy {
    /// Any selector is accepted.
    Trusted,
    /// Untrusted replica: updates and removes may only target a document by `_id`.
    IdOnly,
}

/// A write received through the primitive or native operations.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRecord {
    Remove { id: Bson },
    Update { selector: Document, modification: Document },
    Upsert { query: Document, modification: Document },
    FindAndModify { command: Document },
}

struct State {
    /// Documents keyed by the sortable encoding of their `_id`.
    documents: SkipMap<Vec<u8>, Document>,
    /// Serializes writers. Readers go to the skip list directly.
    write_lock: Mutex<()>,
    journal: Mutex<VecDeque<WriteRecord>>,
}

/// An in-memory collection implementing both the native and the primitive operations.
///
/// Clones are handles on the same documents.
#[derive(Clone)]
pub struct MemoryCollection {
    name: Option<String>,
    policy: AccessPolicy,
    id_generator: Arc<dyn IdGenerator>,
    logger: Arc<dyn LoggerAndTracer>,
    journal_capacity: usize,
    state: Arc<State>,
}

/// A compiled read: filter, sort, skip and projection.
struct Read {
    filter: DocumentFilter,
    sort: Vec<SortField>,
    skip: usize,
    projector: Option<Projector>,
}

impl Read {
    fn new(query: &Document, sort: Option<&Document>, fields: Option<&Document>, skip: Option<u64>) -> StoreResult<Self> {
        let filter = to_filter(&parse_conditions(query)?);
        let sort = match sort {
            Some(sort) => parse_sort(sort)?,
            None => Vec::new(),
        };
        let projector = match fields {
            Some(fields) => parse_projection(fields)?.map(|p| to_projector(&p)),
            None => None,
        };
        Ok(Read {
            filter,
            sort,
            skip: skip.unwrap_or(0) as usize,
            projector,
        })
    }

    fn project(&self, doc: Document) -> Document {
        match &self.projector {
            Some(projector) => projector(doc),
            None => doc,
        }
    }
}

impl MemoryCollection {
    pub fn new(name: &str) -> Self {
        Self::with_name(Some(name.to_string()))
    }

    /// A collection not bound to a name, like a local-only scratch collection.
    pub fn unnamed() -> Self {
        Self::with_name(None)
    }

    fn with_name(name: Option<String>) -> Self {
        MemoryCollection {
            name,
            policy: AccessPolicy::Trusted,
            id_generator: Arc::new(RandomIdGenerator::default()),
            logger: Arc::new(NoOpLogger),
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
            state: Arc::new(State {
                documents: SkipMap::new(),
                write_lock: Mutex::new(()),
                journal: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn LoggerAndTracer>) -> Self {
        self.logger = logger;
        self
    }

    /// Keeps at most `capacity` writes in the journal. Zero disables the journal.
    pub fn with_journal_capacity(mut self, capacity: usize) -> Self {
        self.journal_capacity = capacity;
        self
    }

    pub fn policy(&self) -> AccessPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.state.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.documents.is_empty()
    }

    /// Inserts a document, generating its `_id` when missing. Returns the `_id`.
    pub fn insert_one(&self, doc: Document) -> StoreResult<Bson> {
        let _guard = self.lock_writes()?;
        self.insert_locked(doc)
    }

    /// Returns every document matching `query`, in `_id` order.
    pub fn find(&self, query: &Document) -> StoreResult<Vec<Document>> {
        let filter = to_filter(&parse_conditions(query)?);
        Ok(self
            .state
            .documents
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|doc| filter(doc))
            .collect())
    }

    /// The most recent writes received, oldest first.
    pub fn journal(&self) -> Vec<WriteRecord> {
        match self.state.journal.lock() {
            Ok(journal) => journal.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn clear_journal(&self) {
        match self.state.journal.lock() {
            Ok(mut journal) => journal.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    fn record(&self, write: WriteRecord) {
        if self.journal_capacity == 0 {
            return;
        }
        let mut journal = match self.state.journal.lock() {
            Ok(journal) => journal,
            Err(poisoned) => poisoned.into_inner(),
        };
        while journal.len() >= self.journal_capacity {
            journal.pop_front();
        }
        journal.push_back(write);
    }

    fn lock_writes(&self) -> StoreResult<MutexGuard<'_, ()>> {
        self.state
            .write_lock
            .lock()
            .map_err(|_| StoreError::Unexpected("A writer panicked while holding the write lock".to_string()))
    }

    fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }

    /// Returns the first document of the read, before projection.
    fn find_first(&self, read: &Read) -> Option<Document> {
        let mut matches: Vec<Document> = self
            .state
            .documents
            .iter()
            .filter(|entry| (read.filter)(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        in_memory_sort(&mut matches, &read.sort);
        matches.into_iter().nth(read.skip)
    }

    /// Applies `modification` to the first document matching `selector`.
    /// Returns the document before and after the update.
    fn update_first_locked(
        &self,
        selector: &Arc<Expr>,
        read: &Read,
        modification: &Document,
    ) -> StoreResult<Option<(Document, Document)>> {
        let Some(old_doc) = self.find_first(read) else {
            return Ok(None);
        };
        let key = key_of(old_doc.get("_id").unwrap_or(&Bson::Null))?;

        let updater = to_updater(&parse_update(modification)?);
        let ctx = UpdateContext {
            positional_index: positional_index(selector, &old_doc),
            is_insert: false,
        };
        let new_doc = updater(old_doc.clone(), &ctx)?;
        self.state.documents.insert(key, new_doc.clone());
        Ok(Some((old_doc, new_doc)))
    }

    /// Builds the document an upsert inserts: the equality fields of the query, then the
    /// update applied as an insert. An `_id` pinned by the query wins over one set by the
    /// update.
    fn insert_upserted_locked(&self, query: &Document, modification: &Document) -> StoreResult<(Bson, Document)> {
        let mut seed = seed_from_query(query)?;
        let query_id = seed.remove("_id");

        let updater = to_updater(&parse_update(modification)?);
        let ctx = UpdateContext {
            positional_index: None,
            is_insert: true,
        };
        let mut doc = updater(seed, &ctx)?;
        if let Some(id) = query_id {
            doc.insert("_id", id);
        }
        let id = self.insert_locked(doc)?;
        let inserted = self.get_locked(&id)?.unwrap_or_default();
        Ok((id, inserted))
    }

    fn insert_locked(&self, doc: Document) -> StoreResult<Bson> {
        let doc = with_id_first(doc, self.id_generator.as_ref());
        let id = doc.get("_id").cloned().unwrap_or(Bson::Null);
        let key = key_of(&id)?;

        if self.state.documents.contains_key(&key) {
            return Err(StoreError::DuplicateKey(format!(
                "E11000 duplicate key error collection: {} index: _id_ dup key: {{ _id: {} }}",
                self.display_name(),
                id
            )));
        }
        self.state.documents.insert(key, doc);
        Ok(id)
    }

    fn get_locked(&self, id: &Bson) -> StoreResult<Option<Document>> {
        let key = key_of(id)?;
        Ok(self.state.documents.get(&key).map(|entry| entry.value().clone()))
    }

    fn check_selector_allowed(&self, selector: &Document) -> StoreResult<()> {
        if self.policy == AccessPolicy::IdOnly && !is_id_selector(selector) {
            return Err(StoreError::NotPermitted(
                "Not permitted. Untrusted code may only update documents by ID.".to_string(),
            ));
        }
        Ok(())
    }

    /// Executes the native find-and-modify command atomically under the write lock.
    fn execute_find_and_modify(&self, command: &NativeCommand) -> StoreResult<NativeResult> {
        let _guard = self.lock_writes()?;
        self.record(WriteRecord::FindAndModify {
            command: command.to_document(self.display_name()),
        });

        let selector = parse_conditions(&command.query)?;
        let read = Read::new(&command.query, Some(&command.sort), command.options.fields.as_ref(), None)?;

        if command.is_remove() {
            return Ok(match self.find_first(&read) {
                Some(doc) => {
                    self.state.documents.remove(&key_of(doc.get("_id").unwrap_or(&Bson::Null))?);
                    NativeResult::new(Some(read.project(doc)), LastErrorObject { n: 1, ..Default::default() })
                }
                None => NativeResult::new(None, LastErrorObject::default()),
            });
        }

        let update = command
            .update
            .as_ref()
            .ok_or_else(|| StoreError::BadQuery("Either an update or remove=true must be specified".to_string()))?;

        if let Some((old_doc, new_doc)) = self.update_first_locked(&selector, &read, update)? {
            let value = if command.is_return_new() { new_doc } else { old_doc };
            return Ok(NativeResult::new(
                Some(read.project(value)),
                LastErrorObject { n: 1, updated_existing: true, upserted: None },
            ));
        }

        if command.is_upsert() {
            let (id, inserted) = self.insert_upserted_locked(&command.query, update)?;
            let value = if command.is_return_new() { Some(read.project(inserted)) } else { None };
            return Ok(NativeResult::new(
                value,
                LastErrorObject { n: 1, updated_existing: false, upserted: Some(id) },
            ));
        }

        Ok(NativeResult::new(None, LastErrorObject::default()))
    }
}

/// Puts `_id` in front, generating it when missing.
fn with_id_first(doc: Document, id_generator: &dyn IdGenerator) -> Document {
    let id = match doc.get("_id") {
        Some(id) => id.clone(),
        None => Bson::String(id_generator.generate()),
    };
    let mut ordered = doc! { "_id": id };
    for (key, value) in doc {
        if key != "_id" {
            ordered.insert(key, value);
        }
    }
    ordered
}

fn key_of(id: &Bson) -> StoreResult<Vec<u8>> {
    id.try_into_key()
        .map_err(|e| StoreError::BadQuery(format!("Invalid _id {}: {}", id, e)))
}

/// `{_id: <value>}`, where the value is not an operator document.
fn is_id_selector(selector: &Document) -> bool {
    if selector.len() != 1 {
        return false;
    }
    match selector.get("_id") {
        Some(Bson::Document(value)) => !value.keys().any(|k| k.starts_with('$')),
        Some(_) => true,
        None => false,
    }
}

/// Collects the fields a query pins to a single value (`a: 1`, `a: {$eq: 1}` and the same
/// inside `$and`) into the document an upsert starts from.
fn seed_from_query(query: &Document) -> StoreResult<Document> {
    let mut set = Document::new();
    collect_equalities(query, &mut set);
    if set.is_empty() {
        return Ok(Document::new());
    }
    let updater = to_updater(&parse_update(&doc! { "$set": set })?);
    updater(Document::new(), &UpdateContext { positional_index: None, is_insert: true })
}

fn collect_equalities(query: &Document, set: &mut Document) {
    for (key, value) in query {
        if key == "$and" {
            if let Bson::Array(children) = value {
                for child in children {
                    if let Bson::Document(child) = child {
                        collect_equalities(child, set);
                    }
                }
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }
        match value {
            Bson::Document(operators) if operators.keys().next().map_or(false, |k| k.starts_with('$')) => {
                if let Some(eq) = operators.get("$eq") {
                    set.insert(key.clone(), eq.clone());
                }
            }
            _ => {
                set.insert(key.clone(), value.clone());
            }
        }
    }
}

impl NamedCollection for MemoryCollection {
    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl NativeCollection for MemoryCollection {
    fn find_and_modify(&self, command: NativeCommand, callback: Arc<dyn Callback<StoreResult<NativeResult>>>) {
        debug!(self.logger, "Executing native findAndModify on {}: {}", self.display_name(), command.to_document(self.display_name()));
        let collection = self.clone();
        thread::spawn(move || {
            let result = collection.execute_find_and_modify(&command);
            if let Err(e) = &result {
                error!(collection.logger, "Native findAndModify on {} failed: {}", collection.display_name(), e);
            }
            callback.call(result);
        });
    }
}

impl PrimitiveCollection for MemoryCollection {
    fn read_one(&self, query: &Document, options: &ReadOptions) -> StoreResult<Option<Document>> {
        let read = Read::new(query, options.sort.as_ref(), options.fields.as_ref(), options.skip)?;
        Ok(self.find_first(&read).map(|doc| read.project(doc)))
    }

    fn remove_by_id(&self, id: &Bson) -> StoreResult<u64> {
        let _guard = self.lock_writes()?;
        self.record(WriteRecord::Remove { id: id.clone() });
        let key = key_of(id)?;
        Ok(self.state.documents.remove(&key).map_or(0, |_| 1))
    }

    fn update_by_selector(&self, selector: &Document, modification: &Document) -> StoreResult<u64> {
        self.check_selector_allowed(selector)?;

        let _guard = self.lock_writes()?;
        self.record(WriteRecord::Update {
            selector: selector.clone(),
            modification: modification.clone(),
        });
        debug!(self.logger, "Updating {} with selector {}", self.display_name(), selector);

        let expr = parse_conditions(selector)?;
        let read = Read::new(selector, None, None, None)?;
        Ok(self.update_first_locked(&expr, &read, modification)?.map_or(0, |_| 1))
    }

    fn upsert(&self, query: &Document, modification: &Document) -> StoreResult<UpsertResult> {
        let _guard = self.lock_writes()?;
        self.record(WriteRecord::Upsert {
            query: query.clone(),
            modification: modification.clone(),
        });

        let expr = parse_conditions(query)?;
        let read = Read::new(query, None, None, None)?;
        if self.update_first_locked(&expr, &read, modification)?.is_some() {
            return Ok(UpsertResult { number_affected: 1, inserted_id: None });
        }

        let (id, _) = self.insert_upserted_locked(query, modification)?;
        Ok(UpsertResult { number_affected: 1, inserted_id: Some(id) })
    }
}
