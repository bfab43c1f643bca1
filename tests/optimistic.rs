use bson::{doc, Bson, Document};
use find_and_modify::executor::OptimisticExecutor;
use find_and_modify::obs::logger::{LogLevel, StdoutLogger};
use find_and_modify::obs::metrics::MetricRegistry;
use find_and_modify::options::options::ExecutorOptions;
use find_and_modify::store::memory::{AccessPolicy, MemoryCollection, WriteRecord};
use find_and_modify::store::StoreError;
use find_and_modify::{Error, ExecutionContext, FindAndModify, FindAndModifyRequest};
use std::sync::Arc;

fn get_sample_data() -> Vec<Document> {
    vec![
        doc! { "_id": "o1", "customer": "ann", "status": "open", "total": 30, "items": [{ "sku": "pen", "qty": 1 }, { "sku": "ink", "qty": 2 }] },
        doc! { "_id": "o2", "customer": "bob", "status": "open", "total": 10, "items": [{ "sku": "pad", "qty": 4 }] },
        doc! { "_id": "o3", "customer": "ann", "status": "closed", "total": 50, "items": [] },
    ]
}

fn setup(policy: AccessPolicy) -> (Arc<MemoryCollection>, OptimisticExecutor) {
    let collection = MemoryCollection::new("orders").with_policy(policy);
    for doc in get_sample_data() {
        collection.insert_one(doc).unwrap();
    }
    let collection = Arc::new(collection);
    let executor = OptimisticExecutor::new(
        collection.clone(),
        &ExecutorOptions::default(),
        StdoutLogger::new(LogLevel::Debug, true),
        &mut MetricRegistry::new(),
    );
    (collection, executor)
}

fn execute(executor: &OptimisticExecutor, request: &FindAndModifyRequest, context: ExecutionContext) -> find_and_modify::Result<Option<Document>> {
    executor
        .find_and_modify(Some(request), false, context)
        .map(|output| output.into_value())
}

fn writes(collection: &MemoryCollection) -> Vec<WriteRecord> {
    collection.journal()
}

#[test]
fn test_top_level_update_targets_id_only() {
    let (collection, executor) = setup(AccessPolicy::IdOnly);
    let request = FindAndModifyRequest::new(doc! { "customer": "ann", "status": "open" })
        .update(doc! { "$set": { "status": "shipped" } });

    let value = execute(&executor, &request, ExecutionContext::top_level()).unwrap();

    assert_eq!(value, Some(get_sample_data()[0].clone()));
    assert_eq!(
        writes(&collection),
        vec![WriteRecord::Update {
            selector: doc! { "_id": "o1" },
            modification: doc! { "$set": { "status": "shipped" } },
        }]
    );
    assert_eq!(collection.find(&doc! { "_id": "o1" }).unwrap()[0].get_str("status").unwrap(), "shipped");
}

#[test]
fn test_nested_update_keeps_query() {
    let (collection, executor) = setup(AccessPolicy::Trusted);
    let request = FindAndModifyRequest::new(doc! { "customer": "bob" })
        .update(doc! { "$inc": { "total": 5 } })
        .return_new(true);

    let value = execute(&executor, &request, ExecutionContext::nested()).unwrap();

    assert_eq!(value.unwrap().get_i32("total").unwrap(), 15);
    assert_eq!(
        writes(&collection),
        vec![WriteRecord::Update {
            selector: doc! { "customer": "bob", "_id": "o2" },
            modification: doc! { "$inc": { "total": 5 } },
        }]
    );
}

#[test]
fn test_nested_positional_update() {
    let (collection, executor) = setup(AccessPolicy::Trusted);
    let request = FindAndModifyRequest::new(doc! { "items": { "$elemMatch": { "sku": "ink" } } })
        .update(doc! { "$inc": { "items.$.qty": 3 } })
        .return_new(true);

    let value = execute(&executor, &request, ExecutionContext::nested()).unwrap().unwrap();

    let expected = vec![
        Bson::Document(doc! { "sku": "pen", "qty": 1 }),
        Bson::Document(doc! { "sku": "ink", "qty": 5 }),
    ];
    assert_eq!(value.get_array("items").unwrap(), &expected);
    assert_eq!(collection.find(&doc! { "_id": "o1" }).unwrap()[0].get_array("items").unwrap(), &expected);
}

#[test]
fn test_top_level_positional_update_loses_the_match() {
    let (collection, executor) = setup(AccessPolicy::Trusted);
    let request = FindAndModifyRequest::new(doc! { "items": { "$elemMatch": { "sku": "ink" } } })
        .update(doc! { "$inc": { "items.$.qty": 3 } });

    let err = execute(&executor, &request, ExecutionContext::top_level()).unwrap_err();

    assert!(matches!(err, Error::Store(StoreError::BadQuery(_))));
    assert_eq!(collection.find(&doc! { "_id": "o1" }).unwrap()[0], get_sample_data()[0]);
}

#[test]
fn test_untrusted_replica_rejects_query_selectors() {
    let (collection, executor) = setup(AccessPolicy::IdOnly);
    let request = FindAndModifyRequest::new(doc! { "customer": "bob" }).update(doc! { "$set": { "total": 0 } });

    let err = execute(&executor, &request, ExecutionContext::nested()).unwrap_err();

    assert_eq!(err.code(), Some(403));
    assert_eq!(err.to_string(), "Not permitted. Untrusted code may only update documents by ID.");
    assert_eq!(collection.find(&doc! { "_id": "o2" }).unwrap()[0].get_i32("total").unwrap(), 10);
}

#[test]
fn test_remove_by_identity() {
    let (collection, executor) = setup(AccessPolicy::IdOnly);
    let request = FindAndModifyRequest::new(doc! { "customer": "ann" })
        .sort(doc! { "total": -1 })
        .fields(doc! { "customer": 1 })
        .remove(true);

    let value = execute(&executor, &request, ExecutionContext::top_level()).unwrap();

    assert_eq!(value, Some(doc! { "_id": "o3", "customer": "ann" }));
    assert_eq!(writes(&collection), vec![WriteRecord::Remove { id: Bson::String("o3".to_string()) }]);
    assert_eq!(collection.len(), 2);
}

#[test]
fn test_upsert_with_new_returns_merged_document() {
    let (collection, executor) = setup(AccessPolicy::Trusted);
    let request = FindAndModifyRequest::new(doc! { "customer": "cid", "status": "open" })
        .update(doc! { "$set": { "total": 0 }, "$setOnInsert": { "items": [] } })
        .upsert(true)
        .return_new(true);

    let value = execute(&executor, &request, ExecutionContext::top_level()).unwrap().unwrap();

    let id = value.get("_id").unwrap().clone();
    assert_eq!(value, doc! { "_id": id.clone(), "customer": "cid", "status": "open", "total": 0, "items": [] });
    assert_eq!(
        writes(&collection),
        vec![WriteRecord::Upsert {
            query: doc! { "customer": "cid", "status": "open" },
            modification: doc! { "$set": { "total": 0 }, "$setOnInsert": { "items": [] } },
        }]
    );
    assert_eq!(collection.find(&doc! { "_id": id }).unwrap(), vec![value]);
}

#[test]
fn test_upsert_without_new_returns_nothing() {
    let (collection, executor) = setup(AccessPolicy::Trusted);
    let request = FindAndModifyRequest::new(doc! { "customer": "dan" })
        .update(doc! { "$set": { "total": 1 } })
        .sort(doc! { "total": 1 })
        .upsert(true);

    assert_eq!(execute(&executor, &request, ExecutionContext::top_level()).unwrap(), None);
    assert_eq!(collection.find(&doc! { "customer": "dan" }).unwrap().len(), 1);
}

#[test]
fn test_upsert_with_match_updates_existing() {
    let (collection, executor) = setup(AccessPolicy::IdOnly);
    let request = FindAndModifyRequest::new(doc! { "customer": "bob" })
        .update(doc! { "$set": { "status": "closed" } })
        .upsert(true);

    let value = execute(&executor, &request, ExecutionContext::top_level()).unwrap();

    assert_eq!(value, Some(get_sample_data()[1].clone()));
    assert_eq!(collection.len(), 3);
    assert!(matches!(&writes(&collection)[0], WriteRecord::Update { selector, .. } if selector == &doc! { "_id": "o2" }));
}

#[test]
fn test_no_match_writes_nothing() {
    let (collection, executor) = setup(AccessPolicy::Trusted);
    let request = FindAndModifyRequest::new(doc! { "customer": "zoe" }).update(doc! { "$set": { "total": 1 } });

    assert_eq!(execute(&executor, &request, ExecutionContext::nested()).unwrap(), None);
    assert!(writes(&collection).is_empty());
}

#[test]
fn test_skip_selects_the_predicted_document() {
    let (collection, executor) = setup(AccessPolicy::IdOnly);
    let request = FindAndModifyRequest::new(doc! {})
        .sort(doc! { "total": 1 })
        .skip(1)
        .update(doc! { "$set": { "flag": true } });

    let value = execute(&executor, &request, ExecutionContext::top_level()).unwrap();

    assert_eq!(value.unwrap().get_str("_id").unwrap(), "o1");
    assert_eq!(collection.find(&doc! { "flag": true }).unwrap().len(), 1);
}
