use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use super::ContentRepository;
use crate::error::{AppError, Result};
use crate::models::{Item, ItemId, ItemStatus};

#[derive(Debug, sqlx::FromRow)]
struct PostRow {
    id: i64,
    author_id: i64,
    title: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PostRow> for Item {
    type Error = AppError;

    fn try_from(row: PostRow) -> Result<Self> {
        Ok(Item {
            id: row.id,
            author_id: row.author_id,
            title: row.title,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Reads the `posts` projection owned by the content service.
#[derive(Clone)]
pub struct PgContentRepository {
    pool: PgPool,
}

impl PgContentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContentRepository for PgContentRepository {
    async fn list_published(&self, page: u32, size: u32) -> Result<Vec<Item>> {
        let offset = i64::from(page.max(1) - 1) * i64::from(size);

        let rows = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT id, author_id, title, status, created_at, updated_at
            FROM posts
            WHERE status = 'published'
            ORDER BY created_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::from(size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        debug!(page = page, size = size, fetched = rows.len(), "Listed published posts");
        rows.into_iter().map(Item::try_from).collect()
    }

    async fn get_by_id(&self, id: ItemId) -> Result<Option<Item>> {
        let row = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT id, author_id, title, status, created_at, updated_at
            FROM posts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Item::try_from).transpose()
    }

    async fn update_status(&self, id: ItemId, status: ItemStatus) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("post {}", id)));
        }
        Ok(())
    }
}
