use sqlx::PgPool;

use crate::error::PreparerError;

const CREATE_RSES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS rses (
    id UUID PRIMARY KEY,
    rse VARCHAR(255) NOT NULL UNIQUE,
    deleted BOOLEAN NOT NULL DEFAULT FALSE,
    available_read BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_RSE_ATTR_MAP_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS rse_attr_map (
    rse_id UUID NOT NULL REFERENCES rses(id),
    key VARCHAR(255) NOT NULL,
    value VARCHAR(255) NOT NULL,
    PRIMARY KEY (rse_id, key)
)
"#;

const CREATE_DISTANCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS distances (
    src_rse_id UUID NOT NULL REFERENCES rses(id),
    dest_rse_id UUID NOT NULL REFERENCES rses(id),
    ranking INTEGER NOT NULL,
    PRIMARY KEY (src_rse_id, dest_rse_id)
)
"#;

const CREATE_REPLICAS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS replicas (
    scope VARCHAR(255) NOT NULL,
    name VARCHAR(255) NOT NULL,
    rse_id UUID NOT NULL REFERENCES rses(id),
    state SMALLINT NOT NULL,
    PRIMARY KEY (scope, name, rse_id)
)
"#;

const CREATE_REQUESTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS requests (
    id UUID PRIMARY KEY,
    scope VARCHAR(255) NOT NULL,
    name VARCHAR(255) NOT NULL,
    dest_rse_id UUID NOT NULL REFERENCES rses(id),
    source_rse_id UUID REFERENCES rses(id),
    account VARCHAR(255) NOT NULL,
    activity VARCHAR(255) NOT NULL DEFAULT 'default',
    state SMALLINT NOT NULL,
    transfertool VARCHAR(255),
    requested_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_REQUESTS_STATE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS requests_state_requested_at_idx
    ON requests (state, requested_at)
"#;

const CREATE_REQUESTS_DEST_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS requests_dest_state_idx
    ON requests (dest_rse_id, state)
"#;

const CREATE_REQUESTS_SOURCE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS requests_source_state_idx
    ON requests (source_rse_id, state)
"#;

const CREATE_RSE_TRANSFER_LIMITS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS rse_transfer_limits (
    rse_id UUID NOT NULL REFERENCES rses(id),
    activity VARCHAR(255) NOT NULL,
    max_transfers BIGINT NOT NULL CHECK (max_transfers >= 0),
    strategy VARCHAR(32),
    PRIMARY KEY (rse_id, activity)
)
"#;

const CREATE_CONFIGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS configs (
    section VARCHAR(128) NOT NULL,
    opt VARCHAR(128) NOT NULL,
    value VARCHAR(4000) NOT NULL,
    PRIMARY KEY (section, opt)
)
"#;

const STATEMENTS: &[(&str, &str)] = &[
    ("rses", CREATE_RSES_TABLE),
    ("rse_attr_map", CREATE_RSE_ATTR_MAP_TABLE),
    ("distances", CREATE_DISTANCES_TABLE),
    ("replicas", CREATE_REPLICAS_TABLE),
    ("requests", CREATE_REQUESTS_TABLE),
    ("requests_state_requested_at_idx", CREATE_REQUESTS_STATE_INDEX),
    ("requests_dest_state_idx", CREATE_REQUESTS_DEST_INDEX),
    ("requests_source_state_idx", CREATE_REQUESTS_SOURCE_INDEX),
    ("rse_transfer_limits", CREATE_RSE_TRANSFER_LIMITS_TABLE),
    ("configs", CREATE_CONFIGS_TABLE),
];

/// Create the catalog tables the preparer reads and writes (idempotent)
pub async fn init_schema(pool: &PgPool) -> Result<(), PreparerError> {
    tracing::info!("Initializing catalog schema...");

    for (object, ddl) in STATEMENTS {
        sqlx::query(*ddl).execute(pool).await.map_err(|e| {
            PreparerError::Database(format!("failed to create {}: {}", object, e))
        })?;
    }

    tracing::info!("Catalog schema initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_are_idempotent() {
        for (object, ddl) in STATEMENTS {
            assert!(ddl.contains("IF NOT EXISTS"), "{} is not idempotent", object);
        }
    }

    #[test]
    fn test_referenced_tables_come_first() {
        let position = |name: &str| STATEMENTS.iter().position(|(o, _)| *o == name).unwrap();
        assert!(position("rses") < position("replicas"));
        assert!(position("rses") < position("requests"));
        assert!(position("rses") < position("rse_transfer_limits"));
    }
}
