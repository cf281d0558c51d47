//! Schema bootstrap.
//!
//! Idempotent DDL executed at startup. Statements only ever add objects;
//! altering existing columns requires a coordinated migration.

use sqlx::PgPool;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS workflows (
        id           TEXT PRIMARY KEY,
        tenant_id    TEXT NOT NULL,
        name         TEXT NOT NULL,
        description  TEXT,
        trigger_type TEXT NOT NULL,
        is_active    BOOLEAN NOT NULL DEFAULT FALSE,
        graph        JSONB NOT NULL,
        created_at   TIMESTAMPTZ NOT NULL,
        updated_at   TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS workflows_trigger_lookup
        ON workflows (tenant_id, trigger_type)
        WHERE is_active
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workflow_executions (
        id              TEXT PRIMARY KEY,
        workflow_id     TEXT NOT NULL,
        tenant_id       TEXT NOT NULL,
        client_id       TEXT NOT NULL,
        status          TEXT NOT NULL,
        current_node_id TEXT NOT NULL,
        context         JSONB NOT NULL,
        snapshot        JSONB NOT NULL,
        attempts        JSONB NOT NULL,
        invocations     JSONB NOT NULL,
        wake_at         TIMESTAMPTZ,
        locked_by       TEXT,
        locked_until    TIMESTAMPTZ,
        created_at      TIMESTAMPTZ NOT NULL,
        updated_at      TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS workflow_executions_due
        ON workflow_executions (wake_at)
        WHERE status = 'waiting_timer'
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS workflow_executions_dedup
        ON workflow_executions (workflow_id, client_id, created_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS execution_effects (
        execution_id TEXT NOT NULL,
        node_id      TEXT NOT NULL,
        attempt      BIGINT NOT NULL,
        output       JSONB NOT NULL,
        recorded_at  TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (execution_id, node_id, attempt)
    )
    "#,
];

/// Creates the dunflow tables and indexes if they do not exist.
///
/// # Errors
///
/// Returns the first sqlx error encountered.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::debug!("schema ensured");
    Ok(())
}
