//! Favorite provider instances: a set of `(provider_code, instance_id)`.

use crate::context::AppContext;
use crate::db::Database;
use crate::error::{AppResult, OrFatal};
use rusqlite::params;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    pub provider_code: String,
    pub instance_id: String,
}

impl Favorite {
    pub fn new(provider_code: &str, instance_id: &str) -> Self {
        Self {
            provider_code: provider_code.to_string(),
            instance_id: instance_id.to_string(),
        }
    }
}

pub struct FavoritesRepo {
    db: Arc<Database>,
}

impl FavoritesRepo {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn list_all(&self, ctx: &AppContext) -> AppResult<Vec<Favorite>> {
        ctx.check()?;
        let conn = self.db.conn();
        let mut stmt = conn
            .prepare(
                "SELECT provider_code, instance_id FROM favorite_instances
                 ORDER BY provider_code, instance_id",
            )
            .or_fatal("Failed to prepare favorites query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Favorite {
                    provider_code: row.get(0)?,
                    instance_id: row.get(1)?,
                })
            })
            .or_fatal("Failed to list favorites")?;

        rows.collect::<Result<Vec<_>, _>>()
            .or_fatal("Failed to read favorite row")
    }

    pub fn is_favorite(&self, ctx: &AppContext, favorite: &Favorite) -> AppResult<bool> {
        ctx.check()?;
        let count: i64 = self
            .db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM favorite_instances WHERE provider_code = ?1 AND instance_id = ?2",
                params![favorite.provider_code, favorite.instance_id],
                |row| row.get(0),
            )
            .or_fatal("Failed to query favorite")?;
        Ok(count > 0)
    }

    /// Adding an existing member is a no-op.
    pub fn add(&self, ctx: &AppContext, favorite: &Favorite) -> AppResult<()> {
        ctx.check()?;
        self.db
            .conn()
            .execute(
                "INSERT OR IGNORE INTO favorite_instances (provider_code, instance_id) VALUES (?1, ?2)",
                params![favorite.provider_code, favorite.instance_id],
            )
            .or_fatal("Failed to add favorite")?;
        debug!(provider = %favorite.provider_code, instance_id = %favorite.instance_id, "Favorite added");
        Ok(())
    }

    /// # Returns
    /// * `Ok(true)` - Membership removed
    /// * `Ok(false)` - `favorite` was not a member
    pub fn remove(&self, ctx: &AppContext, favorite: &Favorite) -> AppResult<bool> {
        ctx.check()?;
        let removed = self
            .db
            .conn()
            .execute(
                "DELETE FROM favorite_instances WHERE provider_code = ?1 AND instance_id = ?2",
                params![favorite.provider_code, favorite.instance_id],
            )
            .or_fatal("Failed to remove favorite")?;
        Ok(removed > 0)
    }
}
