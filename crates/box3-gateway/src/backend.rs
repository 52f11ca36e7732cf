//! Client for the tag and package verification backend.

use serde_json::Value;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),
    #[error("HTTP request error: {0}")]
    HttpRequestError(#[from] reqwest::Error),
}

/// Forwards tag and package requests to `${BACKEND_URL}/api/...`.
#[derive(Debug, Clone)]
pub struct Backend {
    pub base_url: Url,
    pub client: reqwest::Client,
}

impl Backend {
    pub fn new(base_url: Url) -> Self {
        Backend {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// `path` resolved under the base URL, keeping any path prefix it carries.
    pub fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Ok(with_trailing_slash(self.base_url.clone()).join(path)?)
    }

    pub async fn create_tag(&self, body: &Value) -> Result<Value, BackendError> {
        let response = self
            .client
            .post(self.endpoint("api/create_tag/")?)
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response)
    }

    pub async fn get_tag(&self) -> Result<Value, BackendError> {
        let response = self
            .client
            .get(self.endpoint("api/get_tag/")?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response)
    }

    pub async fn verify_package(
        &self,
        product_description: &Value,
        image_url: &Value,
    ) -> Result<Value, BackendError> {
        let body = serde_json::json!({
            "product_description": product_description,
            "image_url": image_url,
        });
        let response = self
            .client
            .post(self.endpoint("api/verify_package/")?)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response)
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
