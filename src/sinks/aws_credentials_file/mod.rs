//! Shared credentials file sink.
//!
//! Each sink instance targets one profile in one credentials file and is
//! bound to a single provider instance. Instances live in
//! `aws_credentials_file` so bindings survive restarts.

pub mod parser;
pub mod writer;

use crate::clock::Clock;
use crate::context::AppContext;
use crate::db::Database;
use crate::error::{AppResult, ErrorCode, OrFatal};
use crate::ids::new_instance_id;
use crate::plumbing::{AwsCredentials, DisconnectSinkInput, Plumber, SinkInstance};
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub const SINK_CODE: &str = "aws-credentials-file";
pub const SINK_NAME: &str = "AWS Credentials File";

const MAX_LABEL_LEN: usize = 50;
const MAX_PROFILE_NAME_LEN: usize = 50;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInstanceInput {
    pub file_path: String,
    pub aws_profile_name: String,
    pub label: String,
    pub provider_code: String,
    pub provider_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsFileInstance {
    pub instance_id: String,
    pub version: i64,
    pub file_path: String,
    pub aws_profile_name: String,
    pub label: String,
    pub provider_code: String,
    pub provider_id: String,
    pub created_at: i64,
    pub last_drained_at: Option<i64>,
}

pub struct AwsCredentialsFileSink {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

pub(crate) fn validate_label(label: &str) -> AppResult<()> {
    let len = label.chars().count();
    if len < 1 || len > MAX_LABEL_LEN {
        return Err(ErrorCode::InvalidLabel.into());
    }
    Ok(())
}

/// Trims and checks a profile name, returning the trimmed form.
pub(crate) fn validate_profile_name(raw: &str) -> AppResult<&str> {
    let name = raw.trim();
    let len = name.chars().count();
    if len < 1 || len > MAX_PROFILE_NAME_LEN {
        return Err(ErrorCode::InvalidAwsProfileName.into());
    }
    Ok(name)
}

impl AwsCredentialsFileSink {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Registers a sink instance bound to a provider instance.
    pub fn new_instance(&self, ctx: &AppContext, input: NewInstanceInput) -> AppResult<String> {
        validate_label(&input.label)?;
        let profile_name = validate_profile_name(&input.aws_profile_name)?;
        if input.provider_code.is_empty() {
            return Err(ErrorCode::InvalidProviderCode.into());
        }
        if input.provider_id.is_empty() {
            return Err(ErrorCode::InvalidProviderId.into());
        }
        let file_path = writer::clean_path(&input.file_path);

        let now = self.clock.now_unix();
        let instance_id = new_instance_id(now);

        ctx.check()?;
        self.db
            .conn()
            .execute(
                r#"
                INSERT INTO aws_credentials_file (
                    instance_id, version, file_path, aws_profile_name, label,
                    provider_code, provider_id, created_at
                ) VALUES (?1, 1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    instance_id,
                    file_path.to_string_lossy(),
                    profile_name,
                    input.label,
                    input.provider_code,
                    input.provider_id,
                    now,
                ],
            )
            .or_fatal("Failed to insert credentials file sink")?;

        info!(
            sink_id = %instance_id,
            provider_code = %input.provider_code,
            provider_id = %input.provider_id,
            "Credentials file sink created"
        );
        Ok(instance_id)
    }

    pub fn get_instance_data(
        &self,
        ctx: &AppContext,
        instance_id: &str,
    ) -> AppResult<CredentialsFileInstance> {
        ctx.check()?;
        self.db
            .conn()
            .query_row(
                r#"
                SELECT instance_id, version, file_path, aws_profile_name, label,
                       provider_code, provider_id, created_at, last_drained_at
                FROM aws_credentials_file
                WHERE instance_id = ?1
                "#,
                [instance_id],
                |row| {
                    Ok(CredentialsFileInstance {
                        instance_id: row.get(0)?,
                        version: row.get(1)?,
                        file_path: row.get(2)?,
                        aws_profile_name: row.get(3)?,
                        label: row.get(4)?,
                        provider_code: row.get(5)?,
                        provider_id: row.get(6)?,
                        created_at: row.get(7)?,
                        last_drained_at: row.get(8)?,
                    })
                },
            )
            .optional()
            .or_fatal("Failed to load credentials file sink")?
            .ok_or_else(|| ErrorCode::InstanceWasNotFound.into())
    }
}

#[async_trait]
impl Plumber<AwsCredentials> for AwsCredentialsFileSink {
    fn sink_code(&self) -> &str {
        SINK_CODE
    }

    async fn list_connected_sinks(
        &self,
        ctx: &AppContext,
        provider_code: &str,
        provider_id: &str,
    ) -> AppResult<Vec<SinkInstance>> {
        ctx.check()?;
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare(
                "SELECT instance_id FROM aws_credentials_file
                 WHERE provider_code = ?1 AND provider_id = ?2
                 ORDER BY instance_id",
            )
            .or_fatal("Failed to prepare connected sinks query")?;
        let ids = stmt
            .query_map(params![provider_code, provider_id], |row| {
                row.get::<_, String>(0)
            })
            .or_fatal("Failed to list connected sinks")?
            .collect::<Result<Vec<_>, _>>()
            .or_fatal("Failed to read connected sink row")?;

        Ok(ids
            .into_iter()
            .map(|sink_id| SinkInstance {
                sink_code: SINK_CODE.to_string(),
                sink_id,
            })
            .collect())
    }

    async fn disconnect_sink(&self, ctx: &AppContext, input: DisconnectSinkInput) -> AppResult<()> {
        if input.sink_code != SINK_CODE {
            return Err(ErrorCode::InstanceWasNotFound.into());
        }
        ctx.check()?;
        let removed = self
            .db
            .conn()
            .execute(
                "DELETE FROM aws_credentials_file WHERE instance_id = ?1",
                [&input.sink_id],
            )
            .or_fatal("Failed to delete credentials file sink")?;
        if removed == 0 {
            return Err(ErrorCode::InstanceWasNotFound.into());
        }

        info!(sink_id = %input.sink_id, "Credentials file sink disconnected");
        Ok(())
    }

    async fn flow_data(&self, ctx: &AppContext, data: &AwsCredentials, sink_id: &str) -> AppResult<()> {
        let instance = self.get_instance_data(ctx, sink_id)?;

        let path = PathBuf::from(&instance.file_path);
        let profile = instance.aws_profile_name.clone();
        let creds = data.clone();
        let write = tokio::task::spawn_blocking(move || {
            writer::write_profile_credentials(&path, &profile, &creds)
        });
        ctx.run(write)
            .await?
            .or_fatal("Credentials write task failed")??;

        ctx.check()?;
        self.db
            .conn()
            .execute(
                "UPDATE aws_credentials_file SET last_drained_at = ?1 WHERE instance_id = ?2",
                params![self.clock.now_unix(), sink_id],
            )
            .or_fatal("Failed to stamp credentials file sink")?;

        info!(sink_id = %sink_id, profile = %instance.aws_profile_name, "Credentials flowed into file");
        Ok(())
    }
}
