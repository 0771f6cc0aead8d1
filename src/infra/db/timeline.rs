//! Post and feed queries. Both collections page by their ordering key with
//! `key < cursor ORDER BY key DESC LIMIT n + 1`.

use sqlx::{Postgres, QueryBuilder};
use tracing::debug;

use crate::application::pagination::{
    Collection, CursorPage, KeyCursor, PageRequest, PageSlice, take_page,
};
use crate::application::repos::RepoError;
use crate::domain::entities::{FeedEntry, Post, PostDraft};
use crate::domain::types::{OrderingKey, PageToken, PostId, UserId};

use super::PostgresRepository;
use super::rows::{FeedEntryRow, POST_COLUMNS, PostRow};
use super::util::{map_creation_error, map_sqlx_error, map_write_error};

const SOURCE: &str = "murmur::infra::db::timeline";

impl PostgresRepository {
    pub(super) async fn insert_post(
        &self,
        author_id: &UserId,
        draft: PostDraft,
    ) -> Result<Post, RepoError> {
        let sql = format!(
            "INSERT INTO posts (author_id, text) VALUES ($1, $2) RETURNING {POST_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(author_id.as_str())
            .bind(draft.text)
            .fetch_one(self.pool())
            .await
            .map_err(map_creation_error)?;

        let post = Post::try_from(row)?;
        debug!(target = SOURCE, post_id = %post.id, author_id = %author_id, "post inserted");
        Ok(post)
    }

    pub(super) async fn update_post_text(
        &self,
        post_id: &PostId,
        new_text: String,
    ) -> Result<Post, RepoError> {
        let sql = format!(
            "UPDATE posts SET text = $2, last_modified_at = now() WHERE id = $1 \
             RETURNING {POST_COLUMNS}"
        );
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(post_id.as_str())
            .bind(new_text)
            .fetch_optional(self.pool())
            .await
            .map_err(map_write_error)?
            .ok_or(RepoError::NotFound)?;

        Post::try_from(row)
    }

    pub(super) async fn find_post(&self, post_id: &PostId) -> Result<Post, RepoError> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1");
        let row = sqlx::query_as::<_, PostRow>(&sql)
            .bind(post_id.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?
            .ok_or(RepoError::NotFound)?;

        Post::try_from(row)
    }

    pub(super) async fn page_posts(
        &self,
        author_id: &UserId,
        page: &PageRequest,
    ) -> Result<CursorPage<Post>, RepoError> {
        let before = self
            .resolve_cursor(Collection::Posts, author_id, page.token())
            .await?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE author_id = "
        ));
        qb.push_bind(author_id.as_str());
        if let Some(key) = before {
            qb.push(" AND seq < ").push_bind(key.get());
        }
        qb.push(" ORDER BY seq DESC LIMIT ")
            .push_bind(page.fetch_limit() as i64);

        let rows = qb
            .build_query_as::<PostRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        let posts = rows
            .into_iter()
            .map(Post::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(finish_page(
            take_page(posts, page.size()),
            Collection::Posts,
            author_id,
            |post| post.ordering_key,
        ))
    }

    pub(super) async fn page_feed(
        &self,
        owner_id: &UserId,
        page: &PageRequest,
    ) -> Result<CursorPage<FeedEntry>, RepoError> {
        let before = self
            .resolve_cursor(Collection::Feed, owner_id, page.token())
            .await?;

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT owner_id, ordering_key, post_id FROM feed_entries WHERE owner_id = ",
        );
        qb.push_bind(owner_id.as_str());
        if let Some(key) = before {
            qb.push(" AND ordering_key < ").push_bind(key.get());
        }
        qb.push(" ORDER BY ordering_key DESC LIMIT ")
            .push_bind(page.fetch_limit() as i64);

        let rows = qb
            .build_query_as::<FeedEntryRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        let entries = rows
            .into_iter()
            .map(FeedEntry::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(finish_page(
            take_page(entries, page.size()),
            Collection::Feed,
            owner_id,
            |entry| entry.ordering_key,
        ))
    }

    pub(super) async fn insert_feed_entry(&self, entry: FeedEntry) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO feed_entries (owner_id, ordering_key, post_id) VALUES ($1, $2, $3) \
             ON CONFLICT (owner_id, ordering_key) DO NOTHING",
        )
        .bind(entry.owner_id.as_str())
        .bind(entry.ordering_key.get())
        .bind(entry.post_id.as_str())
        .execute(self.pool())
        .await
        .map_err(map_write_error)?;
        Ok(())
    }

    /// Decode a non-sentinel token and confirm its boundary item still exists
    /// in the owner's sequence.
    async fn resolve_cursor(
        &self,
        collection: Collection,
        owner: &UserId,
        token: &PageToken,
    ) -> Result<Option<OrderingKey>, RepoError> {
        if token.is_sentinel() {
            return Ok(None);
        }

        let cursor = KeyCursor::decode(token, collection, owner)?;
        let sql = match collection {
            Collection::Posts => {
                "SELECT EXISTS (SELECT 1 FROM posts WHERE author_id = $1 AND seq = $2)"
            }
            Collection::Feed => {
                "SELECT EXISTS (SELECT 1 FROM feed_entries WHERE owner_id = $1 AND ordering_key = $2)"
            }
        };
        let exists: bool = sqlx::query_scalar(sql)
            .bind(owner.as_str())
            .bind(cursor.key().get())
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        if !exists {
            return Err(RepoError::InvalidPageToken(format!(
                "no {} item at the cursor position for `{owner}`",
                collection.as_str()
            )));
        }
        Ok(Some(cursor.key()))
    }
}

fn finish_page<T>(
    slice: PageSlice<T>,
    collection: Collection,
    owner: &UserId,
    key_of: impl Fn(&T) -> OrderingKey,
) -> CursorPage<T> {
    let next_page = match (slice.has_more(), slice.items.last()) {
        (true, Some(boundary)) => {
            KeyCursor::new(collection, owner.clone(), key_of(boundary)).encode()
        }
        _ => PageToken::sentinel(),
    };
    CursorPage::new(slice.items, next_page)
}
