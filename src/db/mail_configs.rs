use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{MailConfig, TlsMode};

pub struct NewConfig {
    pub name: String,
    pub host: String,
    pub port: i32,
    pub tls_mode: TlsMode,
    pub username: String,
    pub password_enc: Option<Vec<u8>>,
    pub from_address: String,
    pub from_name: Option<String>,
    pub is_default: bool,
    pub is_active: bool,
    pub max_retries: i32,
    pub retry_delay_seconds: i32,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Default)]
pub struct ConfigPatch {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<i32>,
    pub tls_mode: Option<TlsMode>,
    pub username: Option<String>,
    pub password_enc: Option<Vec<u8>>,
    pub from_address: Option<String>,
    pub from_name: Option<String>,
    pub is_default: Option<bool>,
    pub is_active: Option<bool>,
    pub max_retries: Option<i32>,
    pub retry_delay_seconds: Option<i32>,
}

pub async fn list(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<MailConfig>, sqlx::Error> {
    sqlx::query_as::<_, MailConfig>(
        "SELECT * FROM mail_configs WHERE deleted_at IS NULL
         ORDER BY is_default DESC, created_at DESC LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM mail_configs WHERE deleted_at IS NULL")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<MailConfig>, sqlx::Error> {
    sqlx::query_as::<_, MailConfig>(
        "SELECT * FROM mail_configs WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn find_active(pool: &PgPool, id: Uuid) -> Result<Option<MailConfig>, sqlx::Error> {
    sqlx::query_as::<_, MailConfig>(
        "SELECT * FROM mail_configs WHERE id = $1 AND is_active AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn find_default(pool: &PgPool) -> Result<Option<MailConfig>, sqlx::Error> {
    sqlx::query_as::<_, MailConfig>(
        "SELECT * FROM mail_configs
         WHERE is_default AND is_active AND deleted_at IS NULL
         ORDER BY updated_at DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await
}

/// Clear the default flag on every live row except `keep`.
async fn clear_default_except(
    tx: &mut Transaction<'_, Postgres>,
    keep: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE mail_configs SET is_default = false, updated_at = now()
         WHERE is_default AND id <> $1 AND deleted_at IS NULL",
    )
    .bind(keep)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn create(pool: &PgPool, new: &NewConfig) -> Result<MailConfig, sqlx::Error> {
    let id = Uuid::now_v7();
    let mut tx = pool.begin().await?;

    if new.is_default {
        clear_default_except(&mut tx, id).await?;
    }

    let config = sqlx::query_as::<_, MailConfig>(
        "INSERT INTO mail_configs (id, name, host, port, tls_mode, username, password_enc,
             from_address, from_name, is_default, is_active, max_retries, retry_delay_seconds)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
         RETURNING *",
    )
    .bind(id)
    .bind(&new.name)
    .bind(&new.host)
    .bind(new.port)
    .bind(new.tls_mode.as_str())
    .bind(&new.username)
    .bind(new.password_enc.as_deref())
    .bind(&new.from_address)
    .bind(new.from_name.as_deref())
    .bind(new.is_default)
    .bind(new.is_active)
    .bind(new.max_retries)
    .bind(new.retry_delay_seconds)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(config)
}

/// Returns `RowNotFound` when the row does not exist or was deleted.
pub async fn update(pool: &PgPool, id: Uuid, patch: &ConfigPatch) -> Result<MailConfig, sqlx::Error> {
    let mut tx = pool.begin().await?;

    if patch.is_default == Some(true) {
        clear_default_except(&mut tx, id).await?;
    }

    let config = sqlx::query_as::<_, MailConfig>(
        "UPDATE mail_configs SET
           name = COALESCE($2, name),
           host = COALESCE($3, host),
           port = COALESCE($4, port),
           tls_mode = COALESCE($5, tls_mode),
           username = COALESCE($6, username),
           password_enc = COALESCE($7, password_enc),
           from_address = COALESCE($8, from_address),
           from_name = COALESCE($9, from_name),
           is_default = COALESCE($10, is_default),
           is_active = COALESCE($11, is_active),
           max_retries = COALESCE($12, max_retries),
           retry_delay_seconds = COALESCE($13, retry_delay_seconds),
           updated_at = now()
         WHERE id = $1 AND deleted_at IS NULL
         RETURNING *",
    )
    .bind(id)
    .bind(patch.name.as_deref())
    .bind(patch.host.as_deref())
    .bind(patch.port)
    .bind(patch.tls_mode.map(|mode| mode.as_str()))
    .bind(patch.username.as_deref())
    .bind(patch.password_enc.as_deref())
    .bind(patch.from_address.as_deref())
    .bind(patch.from_name.as_deref())
    .bind(patch.is_default)
    .bind(patch.is_active)
    .bind(patch.max_retries)
    .bind(patch.retry_delay_seconds)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(config)
}

pub async fn soft_delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE mail_configs SET deleted_at = now(), is_default = false, updated_at = now()
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
