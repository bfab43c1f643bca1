use crate::error::{Error, Result};
use crate::request::FindAndModifyRequest;
use crate::store::NamedCollection;

/// Rejects requests that cannot be executed. Runs before any store access, the same way for
/// every executor. Returns the request once it is known to be present.
pub fn validate<'a, C: NamedCollection + ?Sized>(
    collection: &C,
    request: Option<&'a FindAndModifyRequest>,
) -> Result<&'a FindAndModifyRequest> {
    if collection.name().map_or(true, str::is_empty) {
        return Err(invalid("findAndModify: Must have collection name."));
    }

    let request = request.ok_or_else(|| invalid("findAndModify: Must have args."))?;

    if request.query.is_none() {
        return Err(invalid("findAndModify: Must have query."));
    }

    if !request.has_update() && !request.is_remove() {
        return Err(invalid("findAndModify: Must have update or remove."));
    }

    Ok(request)
}

fn invalid(reason: &str) -> Error {
    Error::InvalidRequest(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    struct Named(Option<&'static str>);

    impl NamedCollection for Named {
        fn name(&self) -> Option<&str> {
            self.0
        }
    }

    fn reason(result: Result<&FindAndModifyRequest>) -> String {
        match result {
            Err(Error::InvalidRequest(reason)) => reason,
            other => panic!("expected an invalid request, got {:?}", other),
        }
    }

    #[test]
    fn test_collection_must_have_name() {
        let request = FindAndModifyRequest::new(doc! {}).remove(true);
        assert_eq!(reason(validate(&Named(None), Some(&request))), "findAndModify: Must have collection name.");
        assert_eq!(reason(validate(&Named(Some("")), Some(&request))), "findAndModify: Must have collection name.");
    }

    #[test]
    fn test_request_checks_in_order() {
        let named = Named(Some("items"));

        assert_eq!(reason(validate(&named, None)), "findAndModify: Must have args.");
        assert_eq!(
            reason(validate(&named, Some(&FindAndModifyRequest::default().remove(true)))),
            "findAndModify: Must have query."
        );
        assert_eq!(
            reason(validate(&named, Some(&FindAndModifyRequest::new(doc! { "a": 1 })))),
            "findAndModify: Must have update or remove."
        );
        assert_eq!(
            reason(validate(&named, Some(&FindAndModifyRequest::new(doc! {}).update(doc! {}).remove(false)))),
            "findAndModify: Must have update or remove."
        );
    }

    #[test]
    fn test_valid_requests() {
        let named = Named(Some("items"));

        assert!(validate(&named, Some(&FindAndModifyRequest::new(doc! {}).remove(true))).is_ok());
        assert!(validate(&named, Some(&FindAndModifyRequest::new(doc! {}).update(doc! { "$set": { "a": 1 } }))).is_ok());
        // Both set is accepted; the remove takes precedence when executing
        assert!(validate(
            &named,
            Some(&FindAndModifyRequest::new(doc! {}).update(doc! { "a": 1 }).remove(true))
        )
        .is_ok());
    }

    #[test]
    fn test_error_code() {
        let err = validate(&Named(Some("items")), None).unwrap_err();
        assert_eq!(err.code(), Some(405));
    }
}
