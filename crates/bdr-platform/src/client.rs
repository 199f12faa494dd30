use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::types::{Layer, LayerVersion, PlatformError, Publish, PublishDraft};

pub const ENV_API_TOKEN: &str = "BDR_API_TOKEN";

type ApiResult<T> = Result<T, PlatformError>;

/// Publishing platform operations used by the orchestrator and verifier.
/// One implementation talks HTTP; tests substitute fakes.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// All publishes carrying the given idempotency reference.
    async fn list_publishes(&self, reference: &str) -> ApiResult<Vec<Publish>>;
    async fn get_publish(&self, id: i64) -> ApiResult<Publish>;
    async fn create_publish(&self, draft: &PublishDraft) -> ApiResult<Publish>;
    async fn cancel_publish(&self, id: i64) -> ApiResult<()>;
    /// Move a waiting-for-approval publish out of its holding state.
    async fn approve_publish(&self, id: i64) -> ApiResult<()>;

    async fn get_layer(&self, layer_id: i64) -> ApiResult<Layer>;
    async fn get_draft_version(&self, layer_id: i64) -> ApiResult<LayerVersion>;
    async fn create_draft_version(
        &self,
        layer_id: i64,
        supplier_reference: &str,
    ) -> ApiResult<LayerVersion>;
    /// Re-tag an existing draft version with a new supplier reference.
    async fn set_supplier_reference(
        &self,
        layer_id: i64,
        version_id: i64,
        supplier_reference: &str,
    ) -> ApiResult<LayerVersion>;
    /// Begin the (asynchronous) re-import of a draft version.
    async fn start_import(&self, layer_id: i64, version_id: i64) -> ApiResult<LayerVersion>;
    async fn list_versions(&self, layer_id: i64) -> ApiResult<Vec<LayerVersion>>;
    async fn get_version(&self, layer_id: i64, version_id: i64) -> ApiResult<LayerVersion>;
}

/// HTTP client for the publishing platform API.
pub struct PlatformClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl PlatformClient {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: endpoint.into(),
            token: token.into(),
        }
    }

    /// Endpoint from config, token from BDR_API_TOKEN.
    pub fn from_env(endpoint: &str) -> anyhow::Result<Self> {
        let token = std::env::var(ENV_API_TOKEN)
            .map_err(|_| anyhow::anyhow!("missing env var {ENV_API_TOKEN}"))?;
        Ok(Self::new(endpoint, token))
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/services/api/v1{}",
            self.base_url.trim_end_matches('/'),
            path
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("Authorization", format!("key {}", self.token))
    }

    async fn check(&self, path: &str, resp: Response) -> ApiResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Err(PlatformError::NotFound(path.to_string())),
            StatusCode::CONFLICT => Err(PlatformError::Conflict(format!("{path}: {message}"))),
            _ => Err(PlatformError::Api {
                status: status.as_u16(),
                message,
            }),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        debug!(path, "platform GET");
        let resp = self.request(Method::GET, path).send().await?;
        let resp = self.check(path, resp).await?;
        Ok(resp.json().await?)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &impl serde::Serialize,
    ) -> ApiResult<T> {
        debug!(path, %method, "platform send");
        let resp = self
            .request(method, path)
            .json(body)
            .send()
            .await?;
        let resp = self.check(path, resp).await?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl PlatformApi for PlatformClient {
    async fn list_publishes(&self, reference: &str) -> ApiResult<Vec<Publish>> {
        debug!(reference, "platform list publishes");
        let path = "/publish/";
        let resp = self
            .request(Method::GET, path)
            .query(&[("reference", reference)])
            .send()
            .await?;
        let resp = self.check(path, resp).await?;
        Ok(resp.json().await?)
    }

    async fn get_publish(&self, id: i64) -> ApiResult<Publish> {
        self.get_json(&format!("/publish/{id}/")).await
    }

    async fn create_publish(&self, draft: &PublishDraft) -> ApiResult<Publish> {
        self.send_json(Method::POST, "/publish/", draft).await
    }

    async fn cancel_publish(&self, id: i64) -> ApiResult<()> {
        let path = format!("/publish/{id}/");
        let resp = self.request(Method::DELETE, &path).send().await?;
        self.check(&path, resp).await?;
        Ok(())
    }

    async fn approve_publish(&self, id: i64) -> ApiResult<()> {
        let path = format!("/publish/{id}/approve/");
        let resp = self.request(Method::POST, &path).send().await?;
        self.check(&path, resp).await?;
        Ok(())
    }

    async fn get_layer(&self, layer_id: i64) -> ApiResult<Layer> {
        self.get_json(&format!("/layers/{layer_id}/")).await
    }

    async fn get_draft_version(&self, layer_id: i64) -> ApiResult<LayerVersion> {
        self.get_json(&format!("/layers/{layer_id}/versions/draft/"))
            .await
    }

    async fn create_draft_version(
        &self,
        layer_id: i64,
        supplier_reference: &str,
    ) -> ApiResult<LayerVersion> {
        self.send_json(
            Method::POST,
            &format!("/layers/{layer_id}/versions/"),
            &serde_json::json!({ "supplier_reference": supplier_reference }),
        )
        .await
    }

    async fn set_supplier_reference(
        &self,
        layer_id: i64,
        version_id: i64,
        supplier_reference: &str,
    ) -> ApiResult<LayerVersion> {
        self.send_json(
            Method::PUT,
            &format!("/layers/{layer_id}/versions/{version_id}/"),
            &serde_json::json!({ "supplier_reference": supplier_reference }),
        )
        .await
    }

    async fn start_import(&self, layer_id: i64, version_id: i64) -> ApiResult<LayerVersion> {
        let path = format!("/layers/{layer_id}/versions/{version_id}/import/");
        let resp = self.request(Method::POST, &path).send().await?;
        let resp = self.check(&path, resp).await?;
        Ok(resp.json().await?)
    }

    async fn list_versions(&self, layer_id: i64) -> ApiResult<Vec<LayerVersion>> {
        self.get_json(&format!("/layers/{layer_id}/versions/"))
            .await
    }

    async fn get_version(&self, layer_id: i64, version_id: i64) -> ApiResult<LayerVersion> {
        self.get_json(&format!("/layers/{layer_id}/versions/{version_id}/"))
            .await
    }
}
