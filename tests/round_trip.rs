use bson::{doc, Document};
use find_and_modify::obs::logger::{LogLevel, StdoutLogger};
use find_and_modify::obs::metrics::MetricRegistry;
use find_and_modify::options::options::{ExecutorKind, ExecutorOptions, Options};
use find_and_modify::store::memory::MemoryCollection;
use find_and_modify::store::{PrimitiveCollection, ReadOptions};
use find_and_modify::{ExecutionContext, Executor, FindAndModify, FindAndModifyRequest};
use std::sync::Arc;

fn setup(kind: ExecutorKind) -> (Arc<MemoryCollection>, Executor, MetricRegistry) {
    let collection = Arc::new(MemoryCollection::new("profiles"));
    collection.insert_one(doc! { "_id": "u1", "name": "ann", "visits": 3, "address": { "city": "Lyon" } }).unwrap();
    collection.insert_one(doc! { "_id": "u2", "name": "bob", "visits": 7 }).unwrap();

    let options = Options::default().with_executor_options(ExecutorOptions::default().with_mode(kind));
    let mut registry = MetricRegistry::new();
    let executor = Executor::new(&options, collection.clone(), StdoutLogger::new(LogLevel::Debug, true), &mut registry);
    (collection, executor, registry)
}

fn read(collection: &MemoryCollection, query: Document) -> Option<Document> {
    collection.read_one(&query, &ReadOptions::default()).unwrap()
}

#[test]
fn test_returned_document_matches_a_later_read() {
    for kind in [ExecutorKind::Authoritative, ExecutorKind::Optimistic] {
        let (collection, executor, _) = setup(kind);
        let request = FindAndModifyRequest::new(doc! { "name": "ann" })
            .update(doc! { "$inc": { "visits": 1 }, "$set": { "address.zip": "69001" }, "$push": { "tags": "new" } })
            .return_new(true);

        let returned = executor
            .find_and_modify(Some(&request), false, ExecutionContext::top_level())
            .unwrap()
            .into_value()
            .unwrap();

        assert_eq!(returned, doc! { "_id": "u1", "name": "ann", "visits": 4, "address": { "city": "Lyon", "zip": "69001" }, "tags": ["new"] });
        assert_eq!(read(&collection, doc! { "_id": "u1" }), Some(returned));
    }
}

#[test]
fn test_replacement_round_trip() {
    for kind in [ExecutorKind::Authoritative, ExecutorKind::Optimistic] {
        let (collection, executor, _) = setup(kind);
        let request = FindAndModifyRequest::new(doc! { "_id": "u2" })
            .update(doc! { "name": "robert" })
            .return_new(true);

        let returned = executor
            .find_and_modify(Some(&request), false, ExecutionContext::nested())
            .unwrap()
            .into_value();

        assert_eq!(returned, Some(doc! { "_id": "u2", "name": "robert" }));
        assert_eq!(read(&collection, doc! { "_id": "u2" }), returned);
    }
}

#[test]
fn test_both_executors_agree() {
    let requests = vec![
        FindAndModifyRequest::new(doc! { "visits": { "$gt": 5 } }).update(doc! { "$set": { "vip": true } }),
        FindAndModifyRequest::new(doc! {}).sort(doc! { "visits": -1 }).remove(true),
        FindAndModifyRequest::new(doc! { "name": "zoe" }).update(doc! { "$set": { "visits": 1 } }),
        FindAndModifyRequest::new(doc! { "name": "ann" }).update(doc! { "$unset": { "address": "" } }).return_new(true).fields(doc! { "address": 0 }),
    ];

    let (authoritative_collection, authoritative, _) = setup(ExecutorKind::Authoritative);
    let (optimistic_collection, optimistic, _) = setup(ExecutorKind::Optimistic);

    for request in &requests {
        let expected = authoritative
            .find_and_modify(Some(request), false, ExecutionContext::top_level())
            .unwrap()
            .into_value();
        let predicted = optimistic
            .find_and_modify(Some(request), false, ExecutionContext::top_level())
            .unwrap()
            .into_value();

        assert_eq!(predicted, expected, "diverged on {:?}", request);
    }
    assert_eq!(authoritative_collection.find(&doc! {}).unwrap(), optimistic_collection.find(&doc! {}).unwrap());
}

#[test]
fn test_branch_counters() {
    let (_, executor, registry) = setup(ExecutorKind::Optimistic);
    let run = |request: FindAndModifyRequest| {
        executor.find_and_modify(Some(&request), false, ExecutionContext::top_level()).unwrap();
    };

    run(FindAndModifyRequest::new(doc! { "_id": "u1" }).update(doc! { "$inc": { "visits": 1 } }));
    run(FindAndModifyRequest::new(doc! { "_id": "u9" }).update(doc! { "$inc": { "visits": 1 } }));
    run(FindAndModifyRequest::new(doc! { "_id": "u9" }).update(doc! { "$inc": { "visits": 1 } }).upsert(true));
    run(FindAndModifyRequest::new(doc! { "_id": "u2" }).remove(true));

    for (name, expected) in [("update", 1), ("no_match", 1), ("upsert_insert", 1), ("remove", 1), ("authoritative", 0)] {
        let counter = registry.get_counter(&format!("find_and_modify.{}", name)).unwrap();
        assert_eq!(counter.get(), expected, "counter {}", name);
    }
}
