//! Media metadata operations

use crate::error::{DbError, Result};
use crate::types::*;
use crate::ContentDb;
use contentive_ids::{ActorId, MediaId};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;

impl ContentDb {
    /// Record an uploaded asset. The bytes themselves are stored elsewhere.
    pub async fn register_media(&self, new: &NewMedia, actor: Actor) -> Result<Media> {
        let size = i64::try_from(new.size)
            .map_err(|_| DbError::invalid_data(format!("media size {} is out of range", new.size)))?;

        let media = Media {
            id: MediaId::new(),
            name: new.name.clone(),
            mime_type: new.mime_type.clone(),
            size: new.size,
            created_by: actor.id,
            created_at: Self::now_millis(),
        };

        sqlx::query(
            r#"
            INSERT INTO media (id, name, mime_type, size, created_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(media.id.to_db_string())
        .bind(&media.name)
        .bind(&media.mime_type)
        .bind(size)
        .bind(media.created_by.to_db_string())
        .bind(media.created_at)
        .execute(&self.pool)
        .await?;

        info!(media_id = %media.id, mime_type = %media.mime_type, size = media.size, "Media registered");
        Ok(media)
    }

    pub async fn get_media(&self, id: MediaId) -> Result<Option<Media>> {
        let row = sqlx::query("SELECT * FROM media WHERE id = ?")
            .bind(id.to_db_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_media).transpose()
    }

    /// Newest first.
    pub async fn list_media(&self) -> Result<Vec<Media>> {
        let rows = sqlx::query("SELECT * FROM media ORDER BY created_at DESC, id ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_media).collect()
    }

    /// Remove a media record. Entries that still reference it are left as-is
    /// and fail validation on their next write.
    pub async fn delete_media(&self, id: MediaId) -> Result<Media> {
        let row = sqlx::query("DELETE FROM media WHERE id = ? RETURNING *")
            .bind(id.to_db_string())
            .fetch_optional(&self.pool)
            .await?;

        let media = match row {
            Some(row) => Self::row_to_media(&row)?,
            None => return Err(DbError::not_found(format!("media {}", id))),
        };

        info!(media_id = %id, "Media deleted");
        Ok(media)
    }

    fn row_to_media(row: &SqliteRow) -> Result<Media> {
        let size: i64 = row.try_get("size")?;

        Ok(Media {
            id: MediaId::parse(&row.try_get::<String, _>("id")?)?,
            name: row.try_get("name")?,
            mime_type: row.try_get("mime_type")?,
            size: u64::try_from(size)
                .map_err(|_| DbError::invalid_data(format!("negative media size {}", size)))?,
            created_by: ActorId::parse(&row.try_get::<String, _>("created_by")?)?,
            created_at: row.try_get("created_at")?,
        })
    }
}
