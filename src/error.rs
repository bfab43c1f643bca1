use std::fmt;
use crate::store::StoreError;

/// Code carried by every request validation failure.
pub const INVALID_REQUEST_CODE: i32 = 405;

#[derive(Debug)]
pub enum Error {
    /// The request was rejected before any store access.
    InvalidRequest(String),
    /// The argument document could not be read as a request.
    BsonDeError(bson::de::Error),
    /// A store operation failed. The store's error is passed through untouched.
    Store(StoreError),
    /// The document matched by the optimistic read has no `_id` to target the write with.
    MissingIdentity,
    /// The native layer dropped the reply channel without answering.
    Interrupted(String),
}

impl Error {
    /// Numeric code of the failure, when it has one.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::InvalidRequest(_) | Error::BsonDeError(_) => Some(INVALID_REQUEST_CODE),
            Error::Store(e) => e.code(),
            Error::MissingIdentity | Error::Interrupted(_) => None,
        }
    }

    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Error::InvalidRequest(_) | Error::BsonDeError(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidRequest(reason) | Error::Interrupted(reason) => write!(f, "{}", reason),
            Error::BsonDeError(e) => write!(f, "findAndModify: Invalid args: {}", e),
            Error::Store(e) => write!(f, "{}", e),
            Error::MissingIdentity => {
                write!(f, "findAndModify: The matched document has no _id")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::BsonDeError(e) => Some(e),
            Error::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<bson::de::Error> for Error {
    fn from(err: bson::de::Error) -> Self {
        Error::BsonDeError(err)
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Store(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(Error::InvalidRequest("x".to_string()).code(), Some(405));
        assert_eq!(Error::Store(StoreError::NotPermitted("x".to_string())).code(), Some(403));
        assert_eq!(Error::Store(StoreError::Unexpected("x".to_string())).code(), None);
        assert_eq!(Error::MissingIdentity.code(), None);
    }

    #[test]
    fn test_store_errors_display_unchanged() {
        let store_error = StoreError::DuplicateKey("Duplicate key error. dup key: { _id: 1 }".to_string());
        let error: Error = store_error.clone().into();
        assert_eq!(error.to_string(), store_error.to_string());
        assert!(!error.is_invalid_request());
    }
}
