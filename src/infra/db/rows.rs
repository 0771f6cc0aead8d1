use std::collections::BTreeSet;

use time::OffsetDateTime;

use crate::application::repos::RepoError;
use crate::domain::entities::{FeedEntry, Post};
use crate::domain::types::{OrderingKey, PostId, UserId};

pub(crate) const POST_COLUMNS: &str = "seq, id, author_id, text, created_at, last_modified_at";

#[derive(sqlx::FromRow)]
pub(crate) struct PostRow {
    pub(crate) seq: i64,
    pub(crate) id: String,
    pub(crate) author_id: String,
    pub(crate) text: String,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) last_modified_at: OffsetDateTime,
}

impl TryFrom<PostRow> for Post {
    type Error = RepoError;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: PostId::parse(row.id).map_err(RepoError::unavailable)?,
            author_id: UserId::parse(row.author_id).map_err(RepoError::unavailable)?,
            text: row.text,
            created_at: row.created_at,
            last_modified_at: row.last_modified_at,
            ordering_key: OrderingKey::new(row.seq),
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct FeedEntryRow {
    pub(crate) owner_id: String,
    pub(crate) ordering_key: i64,
    pub(crate) post_id: String,
}

impl TryFrom<FeedEntryRow> for FeedEntry {
    type Error = RepoError;

    fn try_from(row: FeedEntryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            owner_id: UserId::parse(row.owner_id).map_err(RepoError::unavailable)?,
            post_id: PostId::parse(row.post_id).map_err(RepoError::unavailable)?,
            ordering_key: OrderingKey::new(row.ordering_key),
        })
    }
}

pub(crate) fn parse_user_ids(raw: Vec<String>) -> Result<BTreeSet<UserId>, RepoError> {
    raw.into_iter()
        .map(|id| UserId::parse(id).map_err(RepoError::unavailable))
        .collect()
}
