//! The store surface consumed by the executors.
//!
//! Two capability sets exist. A trusted process talks to the store through
//! [`NativeCollection`], which exposes the atomic find-and-modify command. An untrusted
//! replica only has the [`PrimitiveCollection`] operations. [`memory::MemoryCollection`]
//! implements both.

pub mod callback;
pub mod memory;

use crate::command::NativeCommand;
use crate::store::callback::Callback;
use bson::{doc, Bson, Document};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Malformed query, update, projection or sort.
    BadQuery(String),
    /// The write was refused by the collection's access policy.
    NotPermitted(String),
    DuplicateKey(String),
    Unexpected(String),
}

impl StoreError {
    pub fn code(&self) -> Option<i32> {
        match self {
            StoreError::BadQuery(_) => Some(2),
            StoreError::NotPermitted(_) => Some(403),
            StoreError::DuplicateKey(_) => Some(11000),
            StoreError::Unexpected(_) => None,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::BadQuery(reason)
            | StoreError::NotPermitted(reason)
            | StoreError::DuplicateKey(reason)
            | StoreError::Unexpected(reason) => write!(f, "{}", reason),
        }
    }
}

impl std::error::Error for StoreError {}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A handle on a named collection.
pub trait NamedCollection {
    /// The collection name, or `None` when the handle is not bound to a named collection
    /// (e.g. a local-only scratch collection).
    fn name(&self) -> Option<&str>;
}

/// Store access for trusted processes.
pub trait NativeCollection: NamedCollection + Send + Sync {
    /// Runs the atomic find-and-modify command. The outcome is delivered through `callback`,
    /// possibly from another thread, exactly once.
    fn find_and_modify(
        &self,
        command: NativeCommand,
        callback: Arc<dyn Callback<StoreResult<NativeResult>>>,
    );
}

/// Store access for untrusted replicas.
pub trait PrimitiveCollection: NamedCollection + Send + Sync {
    /// Returns the first document matching `query` once sorted and skipped, projected
    /// through `options.fields`.
    fn read_one(&self, query: &Document, options: &ReadOptions) -> StoreResult<Option<Document>>;

    /// Removes the document with the given `_id`. Returns the number of removed documents.
    fn remove_by_id(&self, id: &Bson) -> StoreResult<u64>;

    /// Applies `modification` to the first document matching `selector`. Returns the number
    /// of modified documents.
    fn update_by_selector(&self, selector: &Document, modification: &Document) -> StoreResult<u64>;

    /// Updates the first document matching `query`, or inserts one built from `query` and
    /// `modification` when nothing matches.
    fn upsert(&self, query: &Document, modification: &Document) -> StoreResult<UpsertResult>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOptions {
    pub sort: Option<Document>,
    pub fields: Option<Document>,
    pub skip: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertResult {
    pub number_affected: u64,
    /// Set only when the upsert inserted a new document.
    pub inserted_id: Option<Bson>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LastErrorObject {
    pub n: u64,
    pub updated_existing: bool,
    pub upserted: Option<Bson>,
}

/// Reply of the native find-and-modify command.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeResult {
    /// The document before or after the modification, depending on the `new` option.
    pub value: Option<Document>,
    pub last_error_object: LastErrorObject,
    pub ok: f64,
}

impl NativeResult {
    pub fn new(value: Option<Document>, last_error_object: LastErrorObject) -> Self {
        NativeResult {
            value,
            last_error_object,
            ok: 1.0,
        }
    }

    /// The reply as the store sends it over the wire.
    pub fn to_document(&self) -> Document {
        let mut last_error_object = doc! {
            "n": self.last_error_object.n as i64,
            "updatedExisting": self.last_error_object.updated_existing,
        };
        if let Some(upserted) = &self.last_error_object.upserted {
            last_error_object.insert("upserted", upserted.clone());
        }

        doc! {
            "lastErrorObject": last_error_object,
            "value": self.value.clone().map(Bson::Document).unwrap_or(Bson::Null),
            "ok": self.ok,
        }
    }
}
