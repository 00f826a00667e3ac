use super::{ObjectStore, StoredObject};
use crate::error::GatewayError;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;

/// Hosted object storage reached over `/storage/v1`.
#[derive(Clone)]
pub struct RestObjectStore {
    client: Client,
    base: String,
    key: String,
}

#[derive(Deserialize)]
struct ListedObject {
    name: String,
    /// Folders come back without an id.
    id: Option<String>,
}

impl RestObjectStore {
    pub fn new(base: &str, key: &str) -> Self {
        Self {
            client: Client::new(),
            base: base.trim_end_matches('/').to_string(),
            key: key.to_string(),
        }
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.key).bearer_auth(&self.key)
    }
}

async fn check(resp: Response) -> Result<Response, GatewayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(match status.as_u16() {
        404 => GatewayError::NotFound(message),
        409 => GatewayError::Conflict(message),
        code => GatewayError::Rejected {
            status: code,
            message,
        },
    })
}

#[async_trait]
impl ObjectStore for RestObjectStore {
    async fn list(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<StoredObject>, GatewayError> {
        let url = format!("{}/storage/v1/object/list/{}", self.base, bucket);
        let body = json!({
            "prefix": prefix.unwrap_or(""),
            "limit": 1000,
            "offset": 0,
            "sortBy": { "column": "name", "order": "desc" },
        });
        let resp = check(self.authed(self.client.post(url)).json(&body).send().await?).await?;
        let listed: Vec<ListedObject> = resp.json().await?;
        Ok(listed
            .into_iter()
            .filter(|o| o.id.is_some())
            .map(|o| StoredObject {
                name: match prefix {
                    Some(p) => format!("{}/{}", p, o.name),
                    None => o.name,
                },
            })
            .collect())
    }

    async fn upload(
        &self,
        bucket: &str,
        name: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), GatewayError> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base, bucket, name);
        let req = self
            .authed(self.client.post(url))
            .header("content-type", content_type)
            .header("cache-control", "max-age=3600")
            .header("x-upsert", "false")
            .body(data);
        check(req.send().await?).await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, name: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base, bucket, name)
    }

    async fn remove(&self, bucket: &str, names: &[String]) -> Result<(), GatewayError> {
        let url = format!("{}/storage/v1/object/{}", self.base, bucket);
        let req = self
            .authed(self.client.delete(url))
            .json(&json!({ "prefixes": names }));
        check(req.send().await?).await?;
        Ok(())
    }
}
