use crate::error::Error;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use events::UserId;
use log::*;

/// Header carrying the caller's resolved identity. The upstream gateway
/// authenticates the user and sets this before the request reaches us;
/// this service trusts it and never sees credentials.
const USER_ID_HEADER: &str = "x-user-id";

pub(crate) struct AuthenticatedUser(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .unwrap_or_default();

        if user_id.is_empty() {
            debug!("Rejecting request without a resolved caller identity");
            return Err(Error::unauthenticated());
        }

        Ok(AuthenticatedUser(user_id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use axum::http::Request;

    async fn extract(request: Request<()>) -> Result<AuthenticatedUser, Error> {
        let (mut parts, _) = request.into_parts();
        AuthenticatedUser::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_resolved_identity_is_accepted() {
        let request = Request::builder()
            .header("x-user-id", "user-123")
            .body(())
            .unwrap();

        let AuthenticatedUser(user_id) = extract(request).await.unwrap();
        assert_eq!(user_id, "user-123");
    }

    #[tokio::test]
    async fn test_missing_identity_is_rejected() {
        let request = Request::builder().body(()).unwrap();

        let rejection = extract(request).await.err().unwrap();
        assert_eq!(rejection.error_kind, ErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn test_blank_identity_is_rejected() {
        let request = Request::builder()
            .header("x-user-id", "   ")
            .body(())
            .unwrap();

        assert!(extract(request).await.is_err());
    }
}
