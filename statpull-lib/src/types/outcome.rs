use http::StatusCode;
use serde::de::DeserializeOwned;
use strum::{Display, EnumDiscriminants};

use crate::{ErrorKind, Result};

/// Classified result of a single call to the stats platform.
///
/// Upstream services signal throttling, missing resources and server trouble
/// in different ways (status codes, error payloads, dropped connections).
/// Everything is folded into this type so that the retry and aggregation
/// logic can match on it exhaustively.
#[derive(Debug, EnumDiscriminants)]
#[strum_discriminants(name(OutcomeKind), derive(Display, Hash))]
pub enum Outcome<T> {
    /// A well-formed payload
    Success(T),
    /// The upstream service asked us to slow down
    RateLimited,
    /// The requested resource does not exist
    NotFound,
    /// The upstream service failed with a 5xx-class status code
    ServerError(u16),
    /// The call did not finish in time
    Timeout,
    /// The payload does not have the expected shape
    Malformed(String),
    /// Any other failure
    Failed(ErrorKind),
}

impl<T> Outcome<T> {
    /// Classify a status code that carries no payload.
    ///
    /// Success codes map to [`Outcome::Failed`] here, because there is no
    /// payload to return; use [`Outcome::from_response`] for full responses.
    #[must_use]
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited,
            StatusCode::NOT_FOUND | StatusCode::GONE => Self::NotFound,
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Self::Timeout,
            s if s.is_server_error() => Self::ServerError(s.as_u16()),
            s => Self::Failed(ErrorKind::RejectedStatusCode(s)),
        }
    }

    /// Map a transport-level error into an outcome
    #[must_use]
    pub fn from_error(error: ErrorKind) -> Self {
        if error.is_timeout() {
            return Self::Timeout;
        }
        match error {
            ErrorKind::Network(e) if e.is_timeout() => Self::Timeout,
            ErrorKind::Network(e) => match e.status() {
                Some(status) => Self::from_status(status),
                None => Self::Failed(ErrorKind::Network(e)),
            },
            ErrorKind::Decode(e) => Self::Malformed(e.to_string()),
            e => Self::Failed(e),
        }
    }

    /// The kind of this outcome, without its payload
    #[must_use]
    pub fn kind(&self) -> OutcomeKind {
        self.into()
    }

    /// Whether this outcome carries a payload
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Return the payload, discarding any failure
    #[must_use]
    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(payload) => Some(payload),
            _ => None,
        }
    }

    /// Transform the payload of a successful outcome
    pub fn map<U, F>(self, f: F) -> Outcome<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Success(payload) => Outcome::Success(f(payload)),
            Self::RateLimited => Outcome::RateLimited,
            Self::NotFound => Outcome::NotFound,
            Self::ServerError(code) => Outcome::ServerError(code),
            Self::Timeout => Outcome::Timeout,
            Self::Malformed(reason) => Outcome::Malformed(reason),
            Self::Failed(e) => Outcome::Failed(e),
        }
    }
}

impl<T: DeserializeOwned> Outcome<T> {
    /// Classify an HTTP response and decode its JSON body on success
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        if !status.is_success() {
            return Self::from_status(status);
        }
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return Self::from_error(ErrorKind::Network(e)),
        };
        match serde_json::from_slice(&body) {
            Ok(payload) => Self::Success(payload),
            Err(e) => Self::Malformed(e.to_string()),
        }
    }

    /// Classify the result of sending a request
    pub async fn from_send_result(result: reqwest::Result<reqwest::Response>) -> Self {
        match result {
            Ok(response) => Self::from_response(response).await,
            Err(e) => Self::from_error(ErrorKind::Network(e)),
        }
    }
}

/// Conversion into an [`Outcome`].
///
/// Implemented for plain outcomes and for outcomes produced behind a
/// dispatcher, where the dispatcher itself may fail the call
/// (timeouts, cancellation).
pub trait IntoOutcome<T> {
    /// Flatten `self` into a single outcome
    fn into_outcome(self) -> Outcome<T>;
}

impl<T> IntoOutcome<T> for Outcome<T> {
    fn into_outcome(self) -> Outcome<T> {
        self
    }
}

impl<T> IntoOutcome<T> for Result<Outcome<T>> {
    fn into_outcome(self) -> Outcome<T> {
        match self {
            Ok(outcome) => outcome,
            Err(e) => Outcome::from_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde::Deserialize;
    use test_utils::mock_server;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Team {
        id: u64,
        name: String,
    }

    #[rstest]
    #[case(StatusCode::TOO_MANY_REQUESTS, OutcomeKind::RateLimited)]
    #[case(StatusCode::NOT_FOUND, OutcomeKind::NotFound)]
    #[case(StatusCode::GONE, OutcomeKind::NotFound)]
    #[case(StatusCode::INTERNAL_SERVER_ERROR, OutcomeKind::ServerError)]
    #[case(StatusCode::BAD_GATEWAY, OutcomeKind::ServerError)]
    #[case(StatusCode::GATEWAY_TIMEOUT, OutcomeKind::Timeout)]
    #[case(StatusCode::FORBIDDEN, OutcomeKind::Failed)]
    fn test_from_status(#[case] status: StatusCode, #[case] expected: OutcomeKind) {
        assert_eq!(Outcome::<()>::from_status(status).kind(), expected);
    }

    #[test]
    fn test_dispatcher_errors_are_flattened() {
        let timed_out: Result<Outcome<u8>> =
            Err(ErrorKind::Timeout(Duration::from_secs(10), None));
        assert_eq!(timed_out.into_outcome().kind(), OutcomeKind::Timeout);

        let cancelled: Result<Outcome<u8>> = Err(ErrorKind::Cancelled(None));
        assert_eq!(cancelled.into_outcome().kind(), OutcomeKind::Failed);

        let ok: Result<Outcome<u8>> = Ok(Outcome::Success(7));
        assert_eq!(ok.into_outcome().success(), Some(7));
    }

    #[tokio::test]
    async fn test_from_response_decodes_payload() {
        let mock_server = mock_server!(
            StatusCode::OK,
            set_body_string(r#"{"id": 7, "name": "Night Owls"}"#)
        );
        let response = reqwest::get(mock_server.uri()).await.unwrap();
        let outcome = Outcome::<Team>::from_response(response).await;
        assert_eq!(
            outcome.success(),
            Some(Team {
                id: 7,
                name: "Night Owls".into()
            })
        );
    }

    #[tokio::test]
    async fn test_from_response_flags_malformed_payload() {
        let mock_server = mock_server!(StatusCode::OK, set_body_string(r#"{"id": "seven"}"#));
        let response = reqwest::get(mock_server.uri()).await.unwrap();
        let outcome = Outcome::<Team>::from_response(response).await;
        assert_eq!(outcome.kind(), OutcomeKind::Malformed);
    }

    #[tokio::test]
    async fn test_from_response_rate_limited() {
        let mock_server = mock_server!(StatusCode::TOO_MANY_REQUESTS);
        let outcome =
            Outcome::<Team>::from_send_result(reqwest::get(mock_server.uri()).await).await;
        assert_eq!(outcome.kind(), OutcomeKind::RateLimited);
    }
}
