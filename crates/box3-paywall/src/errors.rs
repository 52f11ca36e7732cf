use bytes::Bytes;
use http::{HeaderValue, Response, StatusCode, header};
use http_body_util::Full;

use box3_core::{
    challenge::{ChallengeBody, PaymentChallenge},
    decision::ErrorReason,
};

/// An error response from the paywall.
///
/// Every `402` carries the route's challenge in `WWW-Authenticate` and in the
/// JSON body so the client can construct a fresh proof.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub status: StatusCode,
    pub body: ChallengeBody,
}

impl ErrorResponse {
    pub fn reason(&self) -> ErrorReason {
        self.body.error
    }

    /// The `WWW-Authenticate` header, when a challenge is attached.
    ///
    /// Returns `None` if the header value could not be created.
    pub fn header_value(&self) -> Option<HeaderValue> {
        self.body
            .challenge
            .as_ref()
            .map(PaymentChallenge::to_www_authenticate)
            .and_then(|value| HeaderValue::from_str(&value).ok())
    }
}

impl From<ErrorResponse> for Response<Full<Bytes>> {
    fn from(value: ErrorResponse) -> Self {
        let body = match serde_json::to_vec(&value.body) {
            Ok(b) => b,
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to serialize paywall error body to JSON bytes: {err}");
                #[cfg(not(feature = "tracing"))]
                let _ = err;

                let mut response = Response::new(Full::new(Bytes::from_static(
                    b"Failed to serialize paywall error body to JSON bytes",
                )));
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                return response;
            }
        };

        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = value.status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Some(challenge) = value.header_value() {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, challenge);
        }
        response
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        let challenge_header = self.header_value();
        let mut response = (self.status, axum::extract::Json(self.body)).into_response();
        if let Some(challenge) = challenge_header {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, challenge);
        }
        response
    }
}
