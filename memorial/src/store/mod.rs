//! Persistence gateway: an untyped row store contract plus the typed
//! [`Records`] wrapper the controllers talk to.

pub mod memory;
pub mod rest;
pub mod sqlite;

use crate::error::GatewayError;
use crate::model::{Comment, Donation, DonationStatus, ImageGroup, PaymentMethod, RecordId, Tribute};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Tributes,
    Comments,
    Donations,
    ImageGroups,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Tributes => "tributes",
            Table::Comments => "comments",
            Table::Donations => "donations",
            Table::ImageGroups => "image_groups",
        }
    }

    /// Columns a caller may write. `id` and `created_at` belong to the store.
    pub fn writable(&self) -> &'static [&'static str] {
        match self {
            Table::Tributes => &["author_name", "message", "imageUrl"],
            Table::Comments => &["tribute_id", "author_name", "message"],
            Table::Donations => &[
                "amount",
                "donor_name",
                "payment_status",
                "payment_id",
                "payment_method",
            ],
            Table::ImageGroups => &["name"],
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        column == "id" || column == "created_at" || self.writable().contains(&column)
    }

    /// Reject rows that mention columns the table does not have.
    pub fn check_row(&self, row: &Row) -> Result<(), GatewayError> {
        match row.keys().find(|k| !self.writable().contains(&k.as_str())) {
            Some(k) => Err(GatewayError::Rejected {
                status: 400,
                message: format!("unknown column {}.{}", self.name(), k),
            }),
            None => Ok(()),
        }
    }
}

/// Equality filter on one column.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: &'static str,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: &'static str, value: impl Into<Value>) -> Self {
        Self {
            column,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    pub column: &'static str,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: &'static str) -> Self {
        Self {
            column,
            ascending: true,
        }
    }

    pub fn desc(column: &'static str) -> Self {
        Self {
            column,
            ascending: false,
        }
    }
}

/// Remote create/read/update/delete over JSON rows.
///
/// Every call may fail independently. Nothing is atomic across two calls.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a row, returning it with the store-assigned `id` and `created_at`.
    async fn insert(&self, table: Table, row: Row) -> Result<Row, GatewayError>;

    async fn select(
        &self,
        table: Table,
        filters: &[Filter],
        order: &[Order],
    ) -> Result<Vec<Row>, GatewayError>;

    /// Delete matching rows and return how many were removed.
    async fn delete(&self, table: Table, filters: &[Filter]) -> Result<usize, GatewayError>;

    async fn update(
        &self,
        table: Table,
        filters: &[Filter],
        patch: Row,
    ) -> Result<usize, GatewayError>;
}

fn decode<T: DeserializeOwned>(row: Row) -> Result<T, GatewayError> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

fn decode_all<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, GatewayError> {
    rows.into_iter().map(decode).collect()
}

fn object(v: Value) -> Row {
    match v {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

/// Typed access to the four tables.
#[derive(Clone)]
pub struct Records {
    store: Arc<dyn RecordStore>,
}

impl Records {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// All tributes, newest first, ties broken by id.
    pub async fn list_tributes(&self) -> Result<Vec<Tribute>, GatewayError> {
        let rows = self
            .store
            .select(
                Table::Tributes,
                &[],
                &[Order::desc("created_at"), Order::desc("id")],
            )
            .await?;
        decode_all(rows)
    }

    pub async fn insert_tribute(
        &self,
        author_name: &str,
        message: &str,
        image_url: &str,
    ) -> Result<Tribute, GatewayError> {
        let row = object(json!({
            "author_name": author_name,
            "message": message,
            "imageUrl": image_url,
        }));
        decode(self.store.insert(Table::Tributes, row).await?)
    }

    pub async fn delete_tribute(&self, id: RecordId) -> Result<usize, GatewayError> {
        self.store
            .delete(Table::Tributes, &[Filter::eq("id", id)])
            .await
    }

    /// Comments of one tribute, oldest first.
    pub async fn list_comments(&self, tribute_id: RecordId) -> Result<Vec<Comment>, GatewayError> {
        let rows = self
            .store
            .select(
                Table::Comments,
                &[Filter::eq("tribute_id", tribute_id)],
                &[Order::asc("created_at"), Order::asc("id")],
            )
            .await?;
        decode_all(rows)
    }

    pub async fn insert_comment(
        &self,
        tribute_id: RecordId,
        author_name: &str,
        message: &str,
    ) -> Result<Comment, GatewayError> {
        let row = object(json!({
            "tribute_id": tribute_id,
            "author_name": author_name,
            "message": message,
        }));
        decode(self.store.insert(Table::Comments, row).await?)
    }

    /// Deletes comment `id` only if it belongs to `tribute_id`.
    pub async fn delete_comment(
        &self,
        tribute_id: RecordId,
        id: RecordId,
    ) -> Result<usize, GatewayError> {
        self.store
            .delete(
                Table::Comments,
                &[Filter::eq("id", id), Filter::eq("tribute_id", tribute_id)],
            )
            .await
    }

    pub async fn delete_comments_for(&self, tribute_id: RecordId) -> Result<usize, GatewayError> {
        self.store
            .delete(Table::Comments, &[Filter::eq("tribute_id", tribute_id)])
            .await
    }

    pub async fn insert_donation(
        &self,
        amount: u64,
        donor_name: &str,
        reference: &str,
        method: PaymentMethod,
        status: DonationStatus,
    ) -> Result<Donation, GatewayError> {
        let row = object(json!({
            "amount": amount,
            "donor_name": donor_name,
            "payment_id": reference,
            "payment_method": method.as_str(),
            "payment_status": status.as_str(),
        }));
        decode(self.store.insert(Table::Donations, row).await?)
    }

    pub async fn list_donations(&self) -> Result<Vec<Donation>, GatewayError> {
        let rows = self
            .store
            .select(
                Table::Donations,
                &[],
                &[Order::desc("created_at"), Order::desc("id")],
            )
            .await?;
        decode_all(rows)
    }

    pub async fn find_donation(&self, reference: &str) -> Result<Option<Donation>, GatewayError> {
        let rows = self
            .store
            .select(
                Table::Donations,
                &[Filter::eq("payment_id", reference)],
                &[],
            )
            .await?;
        rows.into_iter().next().map(decode).transpose()
    }

    pub async fn set_donation_status(
        &self,
        reference: &str,
        status: DonationStatus,
    ) -> Result<usize, GatewayError> {
        let patch = object(json!({ "payment_status": status.as_str() }));
        self.store
            .update(
                Table::Donations,
                &[Filter::eq("payment_id", reference)],
                patch,
            )
            .await
    }

    pub async fn list_image_groups(&self) -> Result<Vec<ImageGroup>, GatewayError> {
        let rows = self
            .store
            .select(Table::ImageGroups, &[], &[Order::asc("name")])
            .await?;
        decode_all(rows)
    }

    pub async fn insert_image_group(&self, name: &str) -> Result<ImageGroup, GatewayError> {
        let row = object(json!({ "name": name }));
        decode(self.store.insert(Table::ImageGroups, row).await?)
    }
}

/// Current wall clock in unix milliseconds.
pub fn now_millis() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_columns_rejected() {
        let row = object(json!({"author_name": "a", "password": "x"}));
        assert!(Table::Tributes.check_row(&row).is_err());
        let row = object(json!({"author_name": "a", "message": "m", "imageUrl": ""}));
        assert!(Table::Tributes.check_row(&row).is_ok());
        assert!(Table::Comments.has_column("created_at"));
        assert!(!Table::Comments.has_column("imageUrl"));
    }
}
