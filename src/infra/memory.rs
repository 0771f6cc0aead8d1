//! Transient in-process repository.
//!
//! Posts and feed entries live in per-owner ordered maps keyed by
//! [`OrderingKey`]. Page tokens are random handles pointing at a checkpoint;
//! a checkpoint is honored only for the owner and collection it was issued
//! for, and only while its resume key is still present in that sequence.
//! At most [`CHECKPOINT_CAPACITY`] checkpoints are retained; evicted tokens
//! are rejected like unknown ones.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use lru::LruCache;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::application::pagination::{Collection, CursorPage, PageRequest, take_page};
use crate::application::repos::{RepoError, Repository};
use crate::domain::entities::{FeedEntry, Post, PostDraft, SubscribeOutcome};
use crate::domain::types::{OrderingKey, PageToken, PostId, UserId};
use crate::util::lock::{mutex_lock, rw_read, rw_write};

const SOURCE: &str = "murmur::infra::memory";

/// Outstanding page tokens kept before the least recently used is dropped.
pub const CHECKPOINT_CAPACITY: usize = 10_000;

type Sequence = BTreeMap<OrderingKey, PostId>;

#[derive(Default)]
struct StoreState {
    posts: HashMap<PostId, Post>,
    posts_by_author: HashMap<UserId, Sequence>,
    feeds: HashMap<UserId, Sequence>,
    following: HashMap<UserId, BTreeSet<UserId>>,
    followers: HashMap<UserId, BTreeSet<UserId>>,
    last_key: i64,
}

impl StoreState {
    fn sequence(&self, collection: Collection, owner: &UserId) -> Option<&Sequence> {
        match collection {
            Collection::Posts => self.posts_by_author.get(owner),
            Collection::Feed => self.feeds.get(owner),
        }
    }
}

#[derive(Debug, Clone)]
struct Checkpoint {
    collection: Collection,
    owner: UserId,
    /// Key of the next item to emit.
    resume_key: OrderingKey,
}

pub struct MemoryRepository {
    state: RwLock<StoreState>,
    checkpoints: Mutex<LruCache<String, Checkpoint>>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::with_checkpoint_capacity(CHECKPOINT_CAPACITY)
    }

    /// Capacity is clamped to at least one checkpoint.
    pub fn with_checkpoint_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            checkpoints: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    fn resolve_start(
        &self,
        collection: Collection,
        owner: &UserId,
        token: &PageToken,
    ) -> Result<Option<OrderingKey>, RepoError> {
        if token.is_sentinel() {
            return Ok(None);
        }

        let checkpoint = mutex_lock(&self.checkpoints, SOURCE, "resolve_start")
            .get(token.as_str())
            .cloned()
            .ok_or_else(|| RepoError::InvalidPageToken(format!("unknown token `{token}`")))?;

        if checkpoint.collection != collection || &checkpoint.owner != owner {
            return Err(RepoError::InvalidPageToken(format!(
                "token `{token}` was issued for another {} sequence",
                checkpoint.collection.as_str()
            )));
        }

        let state = rw_read(&self.state, SOURCE, "resolve_start");
        let present = state
            .sequence(collection, owner)
            .is_some_and(|seq| seq.contains_key(&checkpoint.resume_key));
        if !present {
            return Err(RepoError::InvalidPageToken(format!(
                "token `{token}` points past the end of the sequence"
            )));
        }

        Ok(Some(checkpoint.resume_key))
    }

    fn issue_checkpoint(
        &self,
        collection: Collection,
        owner: &UserId,
        resume_key: OrderingKey,
    ) -> PageToken {
        let handle = Uuid::new_v4().simple().to_string();
        mutex_lock(&self.checkpoints, SOURCE, "issue_checkpoint").put(
            handle.clone(),
            Checkpoint {
                collection,
                owner: owner.clone(),
                resume_key,
            },
        );
        PageToken::issued(handle)
    }

    fn page_sequence(
        &self,
        collection: Collection,
        owner: &UserId,
        page: &PageRequest,
    ) -> Result<CursorPage<(OrderingKey, PostId)>, RepoError> {
        let start = self.resolve_start(collection, owner, page.token())?;

        let rows: Vec<(OrderingKey, PostId)> = {
            let state = rw_read(&self.state, SOURCE, "page_sequence");
            match state.sequence(collection, owner) {
                Some(seq) => {
                    let newest_first: Box<dyn Iterator<Item = (&OrderingKey, &PostId)>> =
                        match start {
                            Some(key) => Box::new(seq.range(..=key).rev()),
                            None => Box::new(seq.iter().rev()),
                        };
                    newest_first
                        .take(page.fetch_limit())
                        .map(|(key, id)| (*key, id.clone()))
                        .collect()
                }
                None => Vec::new(),
            }
        };

        let slice = take_page(rows, page.size());
        let next_page = match &slice.overflow {
            Some((resume_key, _)) => self.issue_checkpoint(collection, owner, *resume_key),
            None => PageToken::sentinel(),
        };
        Ok(CursorPage::new(slice.items, next_page))
    }
}

fn mint_post_id() -> PostId {
    PostId::minted(URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes()))
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_post(&self, author_id: &UserId, draft: PostDraft) -> Result<Post, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "create_post");
        state.last_key = state
            .last_key
            .checked_add(1)
            .ok_or_else(|| RepoError::CreationFailed("ordering key space exhausted".into()))?;

        let now = OffsetDateTime::now_utc();
        let post = Post {
            id: mint_post_id(),
            author_id: author_id.clone(),
            text: draft.text,
            created_at: now,
            last_modified_at: now,
            ordering_key: OrderingKey::new(state.last_key),
        };

        state
            .posts_by_author
            .entry(author_id.clone())
            .or_default()
            .insert(post.ordering_key, post.id.clone());
        state.posts.insert(post.id.clone(), post.clone());

        debug!(target = SOURCE, post_id = %post.id, author_id = %author_id, "post created");
        Ok(post)
    }

    async fn edit_post(
        &self,
        acting_user_id: &UserId,
        post_id: &PostId,
        new_text: String,
    ) -> Result<Post, RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "edit_post");
        let post = state.posts.get_mut(post_id).ok_or(RepoError::NotFound)?;
        post.text = new_text;
        post.last_modified_at = OffsetDateTime::now_utc();

        debug!(target = SOURCE, post_id = %post_id, acting_user_id = %acting_user_id, "post edited");
        Ok(post.clone())
    }

    async fn get_post_by_id(&self, post_id: &PostId) -> Result<Post, RepoError> {
        rw_read(&self.state, SOURCE, "get_post_by_id")
            .posts
            .get(post_id)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn list_posts_by_author(
        &self,
        author_id: &UserId,
        page: &PageRequest,
    ) -> Result<CursorPage<Post>, RepoError> {
        let keyed = self.page_sequence(Collection::Posts, author_id, page)?;
        let state = rw_read(&self.state, SOURCE, "list_posts_by_author");
        let mut items = Vec::with_capacity(keyed.items.len());
        for (_, id) in &keyed.items {
            let post = state.posts.get(id).cloned().ok_or_else(|| {
                RepoError::Unavailable(format!("post `{id}` indexed but not stored"))
            })?;
            items.push(post);
        }
        Ok(CursorPage::new(items, keyed.next_page))
    }

    async fn subscribe(
        &self,
        follower_id: &UserId,
        followee_id: &UserId,
    ) -> Result<SubscribeOutcome, RepoError> {
        if follower_id == followee_id {
            return Err(RepoError::SelfSubscription);
        }

        let mut state = rw_write(&self.state, SOURCE, "subscribe");
        let added = state
            .followers
            .entry(followee_id.clone())
            .or_default()
            .insert(follower_id.clone());
        state
            .following
            .entry(follower_id.clone())
            .or_default()
            .insert(followee_id.clone());

        Ok(if added {
            SubscribeOutcome::Subscribed
        } else {
            SubscribeOutcome::AlreadySubscribed
        })
    }

    async fn list_followees(&self, user_id: &UserId) -> Result<BTreeSet<UserId>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "list_followees")
            .following
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_followers(&self, user_id: &UserId) -> Result<BTreeSet<UserId>, RepoError> {
        Ok(rw_read(&self.state, SOURCE, "list_followers")
            .followers
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_feed(
        &self,
        owner_id: &UserId,
        page: &PageRequest,
    ) -> Result<CursorPage<FeedEntry>, RepoError> {
        let keyed = self.page_sequence(Collection::Feed, owner_id, page)?;
        Ok(keyed.map(|(ordering_key, post_id)| FeedEntry {
            owner_id: owner_id.clone(),
            post_id,
            ordering_key,
        }))
    }

    async fn append_feed_entry(&self, entry: FeedEntry) -> Result<(), RepoError> {
        let mut state = rw_write(&self.state, SOURCE, "append_feed_entry");
        state
            .feeds
            .entry(entry.owner_id)
            .or_default()
            .entry(entry.ordering_key)
            .or_insert(entry.post_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(raw: &str) -> UserId {
        UserId::parse(raw).expect("valid user id")
    }

    #[tokio::test]
    async fn minted_post_ids_are_url_safe_and_unique() {
        let repo = MemoryRepository::new();
        let author = user("a1");
        let first = repo
            .create_post(&author, PostDraft::new("one"))
            .await
            .expect("created");
        let second = repo
            .create_post(&author, PostDraft::new("two"))
            .await
            .expect("created");

        assert_ne!(first.id, second.id);
        assert!(PostId::parse(first.id.as_str()).is_ok());
        assert!(second.ordering_key > first.ordering_key);
    }

    #[tokio::test]
    async fn checkpoint_is_scoped_to_collection() {
        let repo = MemoryRepository::new();
        let author = user("a1");
        for n in 0..3 {
            let post = repo
                .create_post(&author, PostDraft::new(format!("post {n}")))
                .await
                .expect("created");
            repo.append_feed_entry(FeedEntry::for_post(author.clone(), &post))
                .await
                .expect("appended");
        }

        let page = repo
            .list_posts_by_author(&author, &PageRequest::first(2).expect("request"))
            .await
            .expect("first page");
        assert!(!page.is_last());

        let reuse = PageRequest::new(page.next_page.clone(), 2).expect("request");
        let err = repo
            .list_feed(&author, &reuse)
            .await
            .expect_err("posts token rejected for feed");
        assert!(matches!(err, RepoError::InvalidPageToken(_)));
    }

    #[tokio::test]
    async fn oldest_checkpoints_are_evicted_past_capacity() {
        let repo = MemoryRepository::with_checkpoint_capacity(2);
        let author = user("a1");
        for n in 0..4 {
            repo.create_post(&author, PostDraft::new(format!("post {n}")))
                .await
                .expect("created");
        }

        let first_page = PageRequest::first(1).expect("request");
        let mut tokens = Vec::new();
        for _ in 0..3 {
            let page = repo
                .list_posts_by_author(&author, &first_page)
                .await
                .expect("first page");
            tokens.push(page.next_page);
        }
        assert_eq!(mutex_lock(&repo.checkpoints, SOURCE, "test").len(), 2);

        let evicted = PageRequest::new(tokens[0].clone(), 1).expect("request");
        let err = repo
            .list_posts_by_author(&author, &evicted)
            .await
            .expect_err("evicted token");
        assert!(matches!(err, RepoError::InvalidPageToken(_)));

        let retained = PageRequest::new(tokens[2].clone(), 1).expect("request");
        let page = repo
            .list_posts_by_author(&author, &retained)
            .await
            .expect("retained token");
        assert_eq!(page.items[0].text, "post 2");
    }

    #[tokio::test]
    async fn duplicate_feed_append_is_ignored() {
        let repo = MemoryRepository::new();
        let author = user("a1");
        let reader = user("b2");
        let post = repo
            .create_post(&author, PostDraft::new("hello"))
            .await
            .expect("created");

        let entry = FeedEntry::for_post(reader.clone(), &post);
        repo.append_feed_entry(entry.clone()).await.expect("first");
        repo.append_feed_entry(entry).await.expect("second");

        let feed = repo
            .list_feed(&reader, &PageRequest::first(10).expect("request"))
            .await
            .expect("feed");
        assert_eq!(feed.items.len(), 1);
        assert!(feed.is_last());
    }
}
