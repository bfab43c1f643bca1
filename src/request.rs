use bson::{Bson, Document};
use serde::Deserialize;

/// Arguments of a find-and-modify call.
///
/// Every member is optional so that malformed calls can be represented and rejected by
/// [`validate`](crate::validate::validate). Requests are built with the fluent setters or
/// read from an argument document whose keys use the camelCase wire names
/// (`query`, `update`, `remove`, `sort`, `fields`, `skip`, `upsert`, `new`, `writeConcern`,
/// `maxTimeMS`, `wtimeout`, `explain`, `bypassDocumentValidation`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindAndModifyRequest {
    pub query: Option<Document>,
    pub update: Option<Document>,
    pub remove: Option<bool>,
    pub sort: Option<Document>,
    pub fields: Option<Document>,
    pub skip: Option<u64>,
    pub upsert: Option<bool>,
    /// Return the document after the modification rather than before.
    #[serde(rename = "new")]
    pub return_new: Option<bool>,
    pub write_concern: Option<Bson>,
    #[serde(rename = "maxTimeMS")]
    pub max_time_ms: Option<i64>,
    pub wtimeout: Option<i64>,
    /// Any value asks for an explain; the value itself is not forwarded.
    pub explain: Option<Bson>,
    pub bypass_document_validation: Option<bool>,
}

impl FindAndModifyRequest {
    pub fn new(query: Document) -> Self {
        FindAndModifyRequest {
            query: Some(query),
            ..Default::default()
        }
    }

    /// Reads a request from an untyped argument document.
    pub fn from_document(args: &Document) -> Result<Self, bson::de::Error> {
        bson::from_document(args.clone())
    }

    pub fn update(mut self, update: Document) -> Self {
        self.update = Some(update);
        self
    }

    pub fn remove(mut self, remove: bool) -> Self {
        self.remove = Some(remove);
        self
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn fields(mut self, fields: Document) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = Some(upsert);
        self
    }

    pub fn return_new(mut self, return_new: bool) -> Self {
        self.return_new = Some(return_new);
        self
    }

    pub fn write_concern(mut self, write_concern: impl Into<Bson>) -> Self {
        self.write_concern = Some(write_concern.into());
        self
    }

    pub fn max_time_ms(mut self, max_time_ms: i64) -> Self {
        self.max_time_ms = Some(max_time_ms);
        self
    }

    pub fn wtimeout(mut self, wtimeout: i64) -> Self {
        self.wtimeout = Some(wtimeout);
        self
    }

    pub fn explain(mut self, explain: impl Into<Bson>) -> Self {
        self.explain = Some(explain.into());
        self
    }

    pub fn bypass_document_validation(mut self, bypass: bool) -> Self {
        self.bypass_document_validation = Some(bypass);
        self
    }

    pub fn is_remove(&self) -> bool {
        self.remove.unwrap_or(false)
    }

    pub fn is_upsert(&self) -> bool {
        self.upsert.unwrap_or(false)
    }

    pub fn is_return_new(&self) -> bool {
        self.return_new.unwrap_or(false)
    }

    /// `true` when the request carries a non-empty update document.
    pub fn has_update(&self) -> bool {
        self.update.as_ref().map_or(false, |u| !u.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_from_document() {
        let request = FindAndModifyRequest::from_document(&doc! {
            "query": { "a": 1 },
            "update": { "$inc": { "n": 1 } },
            "new": true,
            "skip": 2,
            "maxTimeMS": 500,
            "writeConcern": "majority",
            "explain": "yes",
            "bypassDocumentValidation": false,
        })
        .unwrap();

        assert_eq!(
            request,
            FindAndModifyRequest::new(doc! { "a": 1 })
                .update(doc! { "$inc": { "n": 1 } })
                .return_new(true)
                .skip(2)
                .max_time_ms(500)
                .write_concern("majority")
                .explain("yes")
                .bypass_document_validation(false)
        );
    }

    #[test]
    fn test_from_document_with_missing_members() {
        let request = FindAndModifyRequest::from_document(&doc! { "remove": true }).unwrap();
        assert_eq!(request.query, None);
        assert!(request.is_remove());
        assert!(!request.is_upsert());
    }

    #[test]
    fn test_from_document_rejects_wrong_types() {
        assert!(FindAndModifyRequest::from_document(&doc! { "query": 1 }).is_err());
        assert!(FindAndModifyRequest::from_document(&doc! { "query": {}, "remove": "yes" }).is_err());
    }

    #[test]
    fn test_has_update() {
        assert!(!FindAndModifyRequest::new(doc! {}).has_update());
        assert!(!FindAndModifyRequest::new(doc! {}).update(doc! {}).has_update());
        assert!(FindAndModifyRequest::new(doc! {}).update(doc! { "a": 1 }).has_update());
    }
}
