use chrono::{DateTime, Utc};
use hooks_core::types::{NewSubscription, Subscription, SubscriptionChanges};
use sqlx::types::Json;
use sqlx::{PgPool, QueryBuilder};

use crate::models::SubscriptionRow;

pub async fn create(pool: &PgPool, new: &NewSubscription) -> Result<Subscription, sqlx::Error> {
    let row = sqlx::query_as::<_, SubscriptionRow>(
        r#"
        INSERT INTO webhook_subscriptions
            (id, name, url, secret, event_filter, retry_enabled, max_attempts,
             base_delay_seconds, custom_headers)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id, name, url, secret, event_filter, active, retry_enabled,
                  max_attempts, base_delay_seconds, custom_headers,
                  last_triggered_at, created_at, updated_at
        "#,
    )
    .bind(&new.id)
    .bind(&new.name)
    .bind(&new.url)
    .bind(&new.secret)
    .bind(&new.event_filter)
    .bind(new.retry_policy.enabled)
    .bind(new.retry_policy.max_attempts)
    .bind(new.retry_policy.base_delay_seconds)
    .bind(Json(&new.custom_headers))
    .fetch_one(pool)
    .await?;

    Ok(row.into())
}

pub async fn get_by_id(pool: &PgPool, id: &str) -> Result<Option<Subscription>, sqlx::Error> {
    let row = sqlx::query_as::<_, SubscriptionRow>(
        r#"
        SELECT id, name, url, secret, event_filter, active, retry_enabled,
               max_attempts, base_delay_seconds, custom_headers,
               last_triggered_at, created_at, updated_at
        FROM webhook_subscriptions
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

pub async fn list(pool: &PgPool) -> Result<Vec<Subscription>, sqlx::Error> {
    let rows = sqlx::query_as::<_, SubscriptionRow>(
        r#"
        SELECT id, name, url, secret, event_filter, active, retry_enabled,
               max_attempts, base_delay_seconds, custom_headers,
               last_triggered_at, created_at, updated_at
        FROM webhook_subscriptions
        ORDER BY created_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn list_active_by_event(
    pool: &PgPool,
    event_type: &str,
) -> Result<Vec<Subscription>, sqlx::Error> {
    let rows = sqlx::query_as::<_, SubscriptionRow>(
        r#"
        SELECT id, name, url, secret, event_filter, active, retry_enabled,
               max_attempts, base_delay_seconds, custom_headers,
               last_triggered_at, created_at, updated_at
        FROM webhook_subscriptions
        WHERE active AND event_filter @> ARRAY[$1]::text[]
        "#,
    )
    .bind(event_type)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

pub async fn update(
    pool: &PgPool,
    id: &str,
    changes: &SubscriptionChanges,
) -> Result<Option<Subscription>, sqlx::Error> {
    let mut qb = QueryBuilder::new("UPDATE webhook_subscriptions SET ");
    let mut set = qb.separated(", ");
    let mut updated = false;

    if let Some(name) = &changes.name {
        set.push("name = ").push_bind_unseparated(name.clone());
        updated = true;
    }
    if let Some(url) = &changes.url {
        set.push("url = ").push_bind_unseparated(url.clone());
        updated = true;
    }
    if let Some(filter) = &changes.event_filter {
        set.push("event_filter = ").push_bind_unseparated(filter.clone());
        updated = true;
    }
    if let Some(active) = changes.active {
        set.push("active = ").push_bind_unseparated(active);
        updated = true;
    }
    if let Some(policy) = changes.retry_policy {
        set.push("retry_enabled = ").push_bind_unseparated(policy.enabled);
        set.push("max_attempts = ").push_bind_unseparated(policy.max_attempts);
        set.push("base_delay_seconds = ")
            .push_bind_unseparated(policy.base_delay_seconds);
        updated = true;
    }
    if let Some(headers) = &changes.custom_headers {
        set.push("custom_headers = ")
            .push_bind_unseparated(Json(headers.clone()));
        updated = true;
    }

    if !updated {
        return Err(sqlx::Error::Protocol("no fields to update".into()));
    }

    set.push("updated_at = now()");
    qb.push(" WHERE id = ").push_bind(id.to_string());
    qb.push(
        " RETURNING id, name, url, secret, event_filter, active, retry_enabled, \
         max_attempts, base_delay_seconds, custom_headers, \
         last_triggered_at, created_at, updated_at",
    );

    let row = qb
        .build_query_as::<SubscriptionRow>()
        .fetch_optional(pool)
        .await?;

    Ok(row.map(Into::into))
}

/// Replace the secret; the old value stops verifying immediately.
pub async fn regenerate_secret(
    pool: &PgPool,
    id: &str,
    secret: &str,
) -> Result<Option<Subscription>, sqlx::Error> {
    let row = sqlx::query_as::<_, SubscriptionRow>(
        r#"
        UPDATE webhook_subscriptions
        SET secret = $1, updated_at = now()
        WHERE id = $2
        RETURNING id, name, url, secret, event_filter, active, retry_enabled,
                  max_attempts, base_delay_seconds, custom_headers,
                  last_triggered_at, created_at, updated_at
        "#,
    )
    .bind(secret)
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Into::into))
}

/// Delete a subscription. Its delivery rows are left in place.
pub async fn delete(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM webhook_subscriptions
        WHERE id = $1
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn touch_last_triggered(
    pool: &PgPool,
    id: &str,
    at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE webhook_subscriptions
        SET last_triggered_at = $1
        WHERE id = $2
        "#,
    )
    .bind(at)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}
