//! Ordered schema migrations with a ledger table.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection};

pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "vault_key_material",
        sql: r#"
            CREATE TABLE argon_key_material (
                key_id          TEXT PRIMARY KEY NOT NULL,
                key_hash_sha256 BLOB NOT NULL,
                argon2_version  INTEGER NOT NULL,
                argon2_variant  TEXT NOT NULL,
                memory          INTEGER NOT NULL,
                iterations      INTEGER NOT NULL,
                parallelism     INTEGER NOT NULL,
                salt_length     INTEGER NOT NULL,
                salt_base64     TEXT NOT NULL,
                key_length      INTEGER NOT NULL,
                created_at      INTEGER NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        name: "event_log",
        sql: r#"
            CREATE TABLE event_log (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type     TEXT NOT NULL,
                event_version  INTEGER NOT NULL,
                source_type    TEXT NOT NULL,
                source_id      TEXT NOT NULL,
                user_id        TEXT NOT NULL,
                created_at     INTEGER NOT NULL,
                causation_id   TEXT NOT NULL,
                correlation_id TEXT NOT NULL,
                data           TEXT NOT NULL
            );
            CREATE INDEX idx_event_log_source ON event_log(source_type, source_id);
        "#,
    },
    Migration {
        version: 3,
        name: "favorites",
        sql: r#"
            CREATE TABLE favorite_instances (
                provider_code TEXT NOT NULL,
                instance_id   TEXT NOT NULL,
                PRIMARY KEY (provider_code, instance_id)
            );
        "#,
    },
    Migration {
        version: 4,
        name: "aws_idc",
        sql: r#"
            CREATE TABLE aws_sso_clients (
                region            TEXT PRIMARY KEY NOT NULL,
                client_id         TEXT NOT NULL,
                client_secret_enc TEXT NOT NULL,
                created_at        INTEGER NOT NULL,
                expires_at        INTEGER NOT NULL,
                enc_key_id        TEXT NOT NULL
            );

            CREATE TABLE aws_idc (
                instance_id             TEXT PRIMARY KEY NOT NULL,
                version                 INTEGER NOT NULL,
                start_url               TEXT NOT NULL UNIQUE,
                region                  TEXT NOT NULL,
                label                   TEXT NOT NULL CHECK (length(label) BETWEEN 1 AND 50),
                enabled                 INTEGER NOT NULL,
                id_token_enc            TEXT NOT NULL,
                access_token_enc        TEXT NOT NULL,
                token_type              TEXT NOT NULL,
                access_token_created_at INTEGER NOT NULL,
                access_token_expires_in INTEGER NOT NULL,
                refresh_token_enc       TEXT NOT NULL,
                enc_key_id              TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 5,
        name: "aws_credentials_file",
        sql: r#"
            CREATE TABLE aws_credentials_file (
                instance_id      TEXT PRIMARY KEY NOT NULL,
                version          INTEGER NOT NULL,
                file_path        TEXT NOT NULL,
                aws_profile_name TEXT NOT NULL,
                label            TEXT NOT NULL,
                provider_code    TEXT NOT NULL CHECK (length(provider_code) > 0),
                provider_id      TEXT NOT NULL CHECK (length(provider_id) > 0),
                created_at       INTEGER NOT NULL,
                last_drained_at  INTEGER
            );
            CREATE INDEX idx_aws_credentials_file_provider
                ON aws_credentials_file(provider_code, provider_id);
        "#,
    },
];

/// Applies every migration newer than the ledger. Returns how many ran.
pub fn apply(conn: &mut Connection) -> Result<usize> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY NOT NULL,
            name       TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        );",
    )
    .context("Failed to create migrations ledger")?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .context("Failed to read migrations ledger")?;

    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn
            .transaction()
            .context("Failed to begin migration transaction")?;
        tx.execute_batch(migration.sql)
            .with_context(|| format!("Migration {} ({}) failed", migration.version, migration.name))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, Utc::now().timestamp()],
        )
        .context("Failed to record migration")?;
        tx.commit().context("Failed to commit migration")?;
        applied += 1;
    }

    Ok(applied)
}
