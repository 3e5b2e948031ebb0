//! Payment receipt ledger
//!
//! A payment reference is applied at most once, ever. Keeping the ledger
//! separate from the entitlement row means a payment replayed after a later
//! renewal is still recognised as a duplicate.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteExecutor};
use tbo_common::db::AccessType;
use tbo_common::time::{from_storage, to_storage};
use uuid::Uuid;

use super::parse_uuid;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentReceipt {
    pub payment_ref: String,
    pub user_id: Uuid,
    pub content_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub access_type: AccessType,
    pub received_at: DateTime<Utc>,
}

pub async fn find_receipt<'e, E>(executor: E, payment_ref: &str) -> Result<Option<PaymentReceipt>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        SELECT payment_ref, user_id, content_id, amount_minor, currency, access_type, received_at
        FROM payment_receipts
        WHERE payment_ref = ?
        "#,
    )
    .bind(payment_ref)
    .fetch_optional(executor)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let user_id: String = row.try_get("user_id")?;
    let content_id: String = row.try_get("content_id")?;
    let access_type: String = row.try_get("access_type")?;
    let received_at: String = row.try_get("received_at")?;

    Ok(Some(PaymentReceipt {
        payment_ref: row.try_get("payment_ref")?,
        user_id: parse_uuid("user_id", &user_id)?,
        content_id: parse_uuid("content_id", &content_id)?,
        amount_minor: row.try_get("amount_minor")?,
        currency: row.try_get("currency")?,
        access_type: access_type.parse()?,
        received_at: from_storage(&received_at)?,
    }))
}

/// Record a receipt; a second insert of the same reference is a conflict
pub async fn insert_receipt<'e, E>(executor: E, receipt: &PaymentReceipt) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO payment_receipts
            (payment_ref, user_id, content_id, amount_minor, currency, access_type, received_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&receipt.payment_ref)
    .bind(receipt.user_id.to_string())
    .bind(receipt.content_id.to_string())
    .bind(receipt.amount_minor)
    .bind(&receipt.currency)
    .bind(receipt.access_type.as_str())
    .bind(to_storage(receipt.received_at))
    .execute(executor)
    .await?;

    Ok(())
}
