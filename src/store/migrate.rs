//! Ordered migration scripts (§6: "Schema evolution is via numbered,
//! ordered migration scripts applied at deploy time"). Embedded at
//! compile time and replayed in order against a fresh or existing pool.

use super::StorePool;
use crate::error::Result;

const MIGRATIONS: &[(&str, &str)] = &[
    ("0001_init", include_str!("migrations/0001_init.sql")),
    (
        "0002_generated_columns",
        include_str!("migrations/0002_generated_columns.sql"),
    ),
];

pub async fn run_migrations(store: &StorePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
    )
    .execute(store.pool())
    .await?;

    for (name, sql) in MIGRATIONS {
        let already: Option<(String,)> =
            sqlx::query_as("SELECT name FROM schema_migrations WHERE name = ?")
                .bind(*name)
                .fetch_optional(store.pool())
                .await?;
        if already.is_some() {
            continue;
        }
        let mut tx = store.pool().begin().await?;
        for statement in split_statements(sql) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT INTO schema_migrations (name, applied_at) VALUES (?, strftime('%s','now'))")
            .bind(*name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(migration = *name, "applied migration");
    }
    Ok(())
}

/// Splits a migration file on `;` terminators, skipping blank statements
/// and `--` comment-only lines. Good enough for our own DDL scripts,
/// which never embed a semicolon inside a string literal.
fn split_statements(sql: &str) -> impl Iterator<Item = &str> {
    sql.split(';').filter_map(|raw| {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}
