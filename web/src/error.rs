use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::*;

pub type Result<T> = core::result::Result<T, Error>;

/// Web-layer error, with just enough structure to pick an HTTP status.
/// The push core never surfaces errors this far; everything here comes
/// from request validation or missing caller identity.
#[derive(Debug)]
pub struct Error {
    pub error_kind: ErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Unauthenticated,
    Invalid(String),
}

impl Error {
    pub fn unauthenticated() -> Self {
        Self {
            error_kind: ErrorKind::Unauthenticated,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            error_kind: ErrorKind::Invalid(message.into()),
        }
    }
}

impl StdError for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self.error_kind {
            ErrorKind::Unauthenticated => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED").into_response()
            }
            ErrorKind::Invalid(message) => {
                debug!("Rejecting invalid request: {message}");
                (StatusCode::UNPROCESSABLE_ENTITY, message).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthenticated_maps_to_401() {
        let response = Error::unauthenticated().into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_invalid_maps_to_422() {
        let response = Error::invalid("user_id must not be empty").into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
