use super::{Filter, Order, RecordStore, Row, Table};
use crate::error::GatewayError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use url::Url;

/// Record store on a hosted PostgREST endpoint (`/rest/v1/<table>`).
#[derive(Clone)]
pub struct RestRecordStore {
    client: Client,
    base: Url,
    key: String,
}

impl RestRecordStore {
    pub fn new(base: &str, key: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::new(),
            base: Url::parse(base)?,
            key: key.to_string(),
        })
    }

    /// Build the table URL with PostgREST filter and order parameters.
    pub fn table_url(&self, table: Table, filters: &[Filter], order: &[Order]) -> Result<Url, GatewayError> {
        let mut url = self
            .base
            .join(&format!("rest/v1/{}", table.name()))
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        {
            let mut q = url.query_pairs_mut();
            for f in filters {
                let value = match &f.value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                q.append_pair(f.column, &format!("eq.{}", value));
            }
            if !order.is_empty() {
                let keys: Vec<String> = order
                    .iter()
                    .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
                    .collect();
                q.append_pair("order", &keys.join(","));
            }
        }
        Ok(url)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.key)
            .bearer_auth(&self.key)
            .header("Prefer", "return=representation")
    }
}

async fn rows(resp: Response) -> Result<Vec<Row>, GatewayError> {
    let status = resp.status();
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(GatewayError::Rejected {
            status: status.as_u16(),
            message,
        });
    }
    let values: Vec<Value> = resp.json().await?;
    values
        .into_iter()
        .map(|v| match v {
            Value::Object(row) => Ok(normalize(row)),
            other => Err(GatewayError::Malformed(other.to_string())),
        })
        .collect()
}

/// Hosted stores report `created_at` as RFC 3339; the rest of the crate uses
/// unix milliseconds.
fn normalize(mut row: Row) -> Row {
    let ts = match row.get("created_at") {
        Some(Value::String(ts)) => Some(ts.clone()),
        _ => None,
    };
    if let Some(ts) = ts {
        if let Ok(parsed) = OffsetDateTime::parse(&ts, &Rfc3339) {
            let millis = (parsed.unix_timestamp_nanos() / 1_000_000) as i64;
            row.insert("created_at".into(), Value::from(millis));
        }
    }
    row
}

#[async_trait]
impl RecordStore for RestRecordStore {
    async fn insert(&self, table: Table, row: Row) -> Result<Row, GatewayError> {
        table.check_row(&row)?;
        let url = self.table_url(table, &[], &[])?;
        let resp = self
            .authed(self.client.post(url))
            .json(&Value::Array(vec![Value::Object(row)]))
            .send()
            .await?;
        rows(resp)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Malformed("insert returned no row".into()))
    }

    async fn select(
        &self,
        table: Table,
        filters: &[Filter],
        order: &[Order],
    ) -> Result<Vec<Row>, GatewayError> {
        let mut url = self.table_url(table, filters, order)?;
        url.query_pairs_mut().append_pair("select", "*");
        let resp = self.authed(self.client.get(url)).send().await?;
        rows(resp).await
    }

    async fn delete(&self, table: Table, filters: &[Filter]) -> Result<usize, GatewayError> {
        if filters.is_empty() {
            return Err(GatewayError::Rejected {
                status: 400,
                message: format!("unfiltered delete on {}", table.name()),
            });
        }
        let url = self.table_url(table, filters, &[])?;
        let resp = self.authed(self.client.delete(url)).send().await?;
        Ok(rows(resp).await?.len())
    }

    async fn update(
        &self,
        table: Table,
        filters: &[Filter],
        patch: Row,
    ) -> Result<usize, GatewayError> {
        table.check_row(&patch)?;
        if filters.is_empty() {
            return Err(GatewayError::Rejected {
                status: 400,
                message: format!("unfiltered update on {}", table.name()),
            });
        }
        let url = self.table_url(table, filters, &[])?;
        let resp = self
            .authed(self.client.patch(url))
            .json(&Value::Object(patch))
            .send()
            .await?;
        Ok(rows(resp).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_postgrest_query() {
        let store = RestRecordStore::new("https://demo.example.co/", "anon").unwrap();
        let url = store
            .table_url(
                Table::Comments,
                &[Filter::eq("tribute_id", 7)],
                &[Order::asc("created_at"), Order::asc("id")],
            )
            .unwrap();
        assert_eq!(url.path(), "/rest/v1/comments");
        let q: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(q.contains(&("tribute_id".into(), "eq.7".into())));
        assert!(q.contains(&("order".into(), "created_at.asc,id.asc".into())));
    }

    #[test]
    fn normalizes_timestamps() {
        let mut row = Row::new();
        row.insert("created_at".into(), Value::from("1970-01-01T00:00:01.500Z"));
        let row = normalize(row);
        assert_eq!(row["created_at"], Value::from(1500));
    }
}
