//! Find a document matching a query and atomically modify or remove it.
//!
//! Calls go through the [`FindAndModify`] trait. A trusted process builds an
//! [`Executor::authoritative`] over a [`NativeCollection`] and gets the store's atomic
//! command. An untrusted replica builds an [`Executor::optimistic`] over a
//! [`PrimitiveCollection`] and gets a local prediction made of a read and a write.
//!
//! ```
//! use bson::doc;
//! use find_and_modify::{ExecutionContext, Executor, FindAndModify, FindAndModifyRequest};
//! use find_and_modify::obs::logger::NoOpLogger;
//! use find_and_modify::obs::metrics::MetricRegistry;
//! use find_and_modify::options::options::ExecutorOptions;
//! use find_and_modify::store::memory::MemoryCollection;
//! use std::sync::Arc;
//!
//! let collection = Arc::new(MemoryCollection::new("counters"));
//! collection.insert_one(doc! { "_id": "visits", "n": 1 }).unwrap();
//!
//! let executor = Executor::optimistic(
//!     collection,
//!     &ExecutorOptions::default(),
//!     Arc::new(NoOpLogger),
//!     &mut MetricRegistry::new(),
//! );
//! let request = FindAndModifyRequest::new(doc! { "_id": "visits" })
//!     .update(doc! { "$inc": { "n": 1 } })
//!     .return_new(true);
//!
//! let output = executor
//!     .find_and_modify(Some(&request), false, ExecutionContext::top_level())
//!     .unwrap();
//! assert_eq!(output.into_value(), Some(doc! { "_id": "visits", "n": 2 }));
//! ```

pub mod command;
pub mod context;
pub mod error;
pub mod executor;
pub mod obs;
pub mod options;
mod query;
pub mod request;
pub mod store;
pub mod util;
pub mod validate;

pub use crate::context::{ExecutionContext, ExecutionMode};
pub use crate::error::{Error, Result};
pub use crate::executor::{Executor, FindAndModify, FindAndModifyOutput};
pub use crate::request::FindAndModifyRequest;
pub use crate::store::{NativeCollection, PrimitiveCollection};
