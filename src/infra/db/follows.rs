use std::collections::BTreeSet;

use crate::application::repos::RepoError;
use crate::domain::entities::SubscribeOutcome;
use crate::domain::types::UserId;

use super::PostgresRepository;
use super::rows::parse_user_ids;
use super::util::{map_sqlx_error, map_write_error};

impl PostgresRepository {
    /// Add both directions of a follow edge.
    ///
    /// The follower set is written first and decides the outcome; the
    /// followee set is always upserted so a half-written edge is repaired.
    pub(super) async fn add_follow_edge(
        &self,
        follower_id: &UserId,
        followee_id: &UserId,
    ) -> Result<SubscribeOutcome, RepoError> {
        let inserted = sqlx::query(
            "INSERT INTO followers (user_id, follower_ids) VALUES ($1, ARRAY[$2::text]) \
             ON CONFLICT (user_id) DO UPDATE \
             SET follower_ids = array_append(followers.follower_ids, $2::text) \
             WHERE NOT ($2::text = ANY (followers.follower_ids))",
        )
        .bind(followee_id.as_str())
        .bind(follower_id.as_str())
        .execute(self.pool())
        .await
        .map_err(map_write_error)?
        .rows_affected();

        sqlx::query(
            "INSERT INTO following (user_id, followee_ids) VALUES ($1, ARRAY[$2::text]) \
             ON CONFLICT (user_id) DO UPDATE \
             SET followee_ids = array_append(following.followee_ids, $2::text) \
             WHERE NOT ($2::text = ANY (following.followee_ids))",
        )
        .bind(follower_id.as_str())
        .bind(followee_id.as_str())
        .execute(self.pool())
        .await
        .map_err(map_write_error)?;

        Ok(if inserted > 0 {
            SubscribeOutcome::Subscribed
        } else {
            SubscribeOutcome::AlreadySubscribed
        })
    }

    pub(super) async fn followee_set(
        &self,
        user_id: &UserId,
    ) -> Result<BTreeSet<UserId>, RepoError> {
        let ids: Option<Vec<String>> =
            sqlx::query_scalar("SELECT followee_ids FROM following WHERE user_id = $1")
                .bind(user_id.as_str())
                .fetch_optional(self.pool())
                .await
                .map_err(map_sqlx_error)?;
        parse_user_ids(ids.unwrap_or_default())
    }

    pub(super) async fn follower_set(
        &self,
        user_id: &UserId,
    ) -> Result<BTreeSet<UserId>, RepoError> {
        let ids: Option<Vec<String>> =
            sqlx::query_scalar("SELECT follower_ids FROM followers WHERE user_id = $1")
                .bind(user_id.as_str())
                .fetch_optional(self.pool())
                .await
                .map_err(map_sqlx_error)?;
        parse_user_ids(ids.unwrap_or_default())
    }
}
