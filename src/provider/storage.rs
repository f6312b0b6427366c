//! Postgres-backed session directory.
//!
//! Schema lives in `sql/schema.sql`. Only hashes of session tokens are stored.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{
    directory::{SessionDirectory, SessionSnapshot},
    identity::{Identity, SecondFactorMethod},
};
use crate::sso::SessionContext;

#[derive(Clone, Debug)]
pub struct PgSessionDirectory {
    pool: PgPool,
}

impl PgSessionDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn groups(&self, user_id: Uuid) -> Result<Vec<String>> {
        let query = "SELECT group_name FROM user_groups WHERE user_id = $1 ORDER BY group_name";
        let span = db_span("SELECT", query);
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to load user groups")?;
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("group_name")
                    .context("invalid group row")
            })
            .collect()
    }

    async fn second_factors(&self, user_id: Uuid) -> Result<Vec<SecondFactorMethod>> {
        let query = r"
            SELECT method
            FROM user_second_factors
            WHERE user_id = $1 AND enabled
            ORDER BY method
        ";
        let span = db_span("SELECT", query);
        let rows = sqlx::query(query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to load second factors")?;

        let mut methods = Vec::with_capacity(rows.len());
        for row in &rows {
            let method: String = row.try_get("method").context("invalid second factor row")?;
            // Unknown methods are ignored rather than counted as usable.
            if let Some(method) = SecondFactorMethod::parse(&method) {
                methods.push(method);
            }
        }
        Ok(methods)
    }
}

#[async_trait]
impl SessionDirectory for PgSessionDirectory {
    async fn lookup(&self, token_hash: &[u8]) -> Result<Option<SessionSnapshot>> {
        let query = r"
            SELECT
                s.user_id,
                s.confirmed_2fa_during_login,
                FLOOR(EXTRACT(EPOCH FROM s.second_factor_confirmed_at) * 1000000)::BIGINT
                    AS second_factor_confirmed_at,
                u.username,
                u.name,
                u.email,
                u.admin,
                u.moderator
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token_hash = $1
              AND s.expires_at > NOW()
              AND u.active
        ";
        let span = db_span("SELECT", query);
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let user_id: Uuid = row.try_get("user_id")?;
        let context = SessionContext {
            confirmed_2fa_during_login: row.try_get("confirmed_2fa_during_login")?,
            second_factor_confirmed_at: row.try_get("second_factor_confirmed_at")?,
        };
        let identity = Identity {
            user_id,
            username: row.try_get("username")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            admin: row.try_get("admin")?,
            moderator: row.try_get("moderator")?,
            groups: self.groups(user_id).await?,
            second_factors: self.second_factors(user_id).await?,
        };

        Ok(Some(SessionSnapshot { identity, context }))
    }

    async fn end_session(&self, token_hash: &[u8]) -> Result<()> {
        let query = "DELETE FROM sessions WHERE token_hash = $1";
        let span = db_span("DELETE", query);
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session")?;
        Ok(())
    }
}

fn db_span(operation: &'static str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}
