use std::time::Duration;

use box3_core::facilitator::{
    Facilitator, PaymentRequest, SettleResponse, SettleResult, SupportedResponse, VerifyResponse,
    VerifyResult,
};
use http::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

/// A facilitator reached over HTTP at `{base_url}/supported`, `/verify` and `/settle`.
#[derive(Debug, Clone)]
pub struct FacilitatorClient {
    pub base_url: Url,
    pub client: reqwest::Client,
    pub headers: HeaderMap,
}

impl FacilitatorClient {
    pub fn from_url(base_url: Url) -> Self {
        FacilitatorClient {
            base_url: with_trailing_slash(base_url),
            client: reqwest::Client::new(),
            headers: HeaderMap::new(),
        }
    }

    /// Parse `base_url` and build a client for it.
    pub fn try_from_str(base_url: &str) -> Result<Self, FacilitatorClientError> {
        Ok(Self::from_url(Url::parse(base_url)?))
    }

    /// Bound every facilitator round trip by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, FacilitatorClientError> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    pub fn header(mut self, key: &HeaderName, value: &HeaderValue) -> Self {
        self.headers.insert(key, value.to_owned());
        self
    }
}

// `Url::join` replaces the last path segment unless the base ends with '/'.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),
    #[error("HTTP request error: {0}")]
    HttpRequestError(#[from] reqwest::Error),
}

impl Facilitator for FacilitatorClient {
    type Error = FacilitatorClientError;

    async fn supported(&self) -> Result<SupportedResponse, Self::Error> {
        let supported = self
            .client
            .get(self.base_url.join("supported")?)
            .headers(self.headers.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(supported)
    }

    async fn verify(&self, request: PaymentRequest) -> Result<VerifyResult, Self::Error> {
        let result = self
            .client
            .post(self.base_url.join("verify")?)
            .headers(self.headers.clone())
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<VerifyResponse>()
            .await?;

        Ok(result.into())
    }

    async fn settle(&self, request: PaymentRequest) -> Result<SettleResult, Self::Error> {
        let result = self
            .client
            .post(self.base_url.join("settle")?)
            .headers(self.headers.clone())
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<SettleResponse>()
            .await?;

        Ok(result.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_resolve_under_base_path() {
        let client = FacilitatorClient::try_from_str("http://localhost:4022/x402").unwrap();
        assert_eq!(
            client.base_url.join("verify").unwrap().as_str(),
            "http://localhost:4022/x402/verify"
        );

        let root = FacilitatorClient::try_from_str("http://localhost:4022").unwrap();
        assert_eq!(
            root.base_url.join("settle").unwrap().as_str(),
            "http://localhost:4022/settle"
        );
    }

    #[test]
    fn test_rejects_bad_url() {
        assert!(matches!(
            FacilitatorClient::try_from_str("not a url"),
            Err(FacilitatorClientError::UrlParseError(_))
        ));
    }
}
