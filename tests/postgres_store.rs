use std::sync::Arc;

use murmur::application::pagination::PageRequest;
use murmur::application::repos::{RepoError, Repository};
use murmur::domain::entities::{FeedEntry, PostDraft, SubscribeOutcome};
use murmur::domain::types::{PageToken, PostId, UserId};
use murmur::infra::db::PostgresRepository;
use sqlx::PgPool;
use tokio::task::JoinSet;

fn user(raw: &str) -> UserId {
    UserId::parse(raw).expect("user id")
}

#[sqlx::test(migrations = "./migrations")]
async fn create_then_get_round_trips(pool: PgPool) {
    let repo = PostgresRepository::new(pool);
    let author = user("a1");

    let created = repo
        .create_post(&author, PostDraft::new("hello"))
        .await
        .expect("create");
    let fetched = repo.get_post_by_id(&created.id).await.expect("get");

    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.text, "hello");
    assert_eq!(fetched.author_id, author);
    assert_eq!(fetched.ordering_key, created.ordering_key);

    let err = repo
        .get_post_by_id(&PostId::parse("missing").expect("id"))
        .await
        .expect_err("missing");
    assert!(matches!(err, RepoError::NotFound));
}

#[sqlx::test(migrations = "./migrations")]
async fn schema_bootstrap_is_repeatable(pool: PgPool) {
    PostgresRepository::ensure_schema(&pool)
        .await
        .expect("first bootstrap");
    PostgresRepository::ensure_schema(&pool)
        .await
        .expect("second bootstrap");
    PostgresRepository::new(pool)
        .health_check()
        .await
        .expect("health");
}

#[sqlx::test(migrations = "./migrations")]
async fn author_pages_walk_newest_first(pool: PgPool) {
    let repo = PostgresRepository::new(pool);
    let author = user("b2");
    let mut created = Vec::new();
    for i in 0..7 {
        created.push(
            repo.create_post(&author, PostDraft::new(format!("p{i}")))
                .await
                .expect("create"),
        );
    }

    let mut token = PageToken::sentinel();
    let mut seen = Vec::new();
    loop {
        let request = PageRequest::new(token, 3).expect("request");
        let page = repo
            .list_posts_by_author(&author, &request)
            .await
            .expect("page");
        assert!(page.items.len() <= 3);
        seen.extend(page.items.into_iter().map(|post| post.id));
        if page.next_page.is_sentinel() {
            break;
        }
        token = page.next_page;
    }

    let expected: Vec<PostId> = created.iter().rev().map(|post| post.id.clone()).collect();
    assert_eq!(seen, expected);
}

#[sqlx::test(migrations = "./migrations")]
async fn page_tokens_do_not_cross_owners(pool: PgPool) {
    let repo = PostgresRepository::new(pool);
    let alice = user("a");
    let bob = user("b");
    for i in 0..2 {
        repo.create_post(&alice, PostDraft::new(format!("a{i}")))
            .await
            .expect("create");
    }

    let page = repo
        .list_posts_by_author(&alice, &PageRequest::first(1).expect("size"))
        .await
        .expect("page");
    let request = PageRequest::new(page.next_page, 1).expect("request");

    let err = repo
        .list_posts_by_author(&bob, &request)
        .await
        .expect_err("other owner");
    assert!(matches!(err, RepoError::InvalidPageToken(_)));

    let err = repo
        .list_feed(&alice, &request)
        .await
        .expect_err("other collection");
    assert!(matches!(err, RepoError::InvalidPageToken(_)));
}

#[sqlx::test(migrations = "./migrations")]
async fn edit_keeps_identity_fields(pool: PgPool) {
    let repo = PostgresRepository::new(pool);
    let author = user("c3");
    let original = repo
        .create_post(&author, PostDraft::new("draft"))
        .await
        .expect("create");

    let edited = repo
        .edit_post(&author, &original.id, "final".to_string())
        .await
        .expect("edit");
    assert_eq!(edited.text, "final");
    assert_eq!(edited.ordering_key, original.ordering_key);
    assert!(edited.last_modified_at >= edited.created_at);

    let err = repo
        .edit_post(&author, &PostId::parse("gone").expect("id"), "x".to_string())
        .await
        .expect_err("missing");
    assert!(matches!(err, RepoError::NotFound));
}

#[sqlx::test(migrations = "./migrations")]
async fn subscriptions_are_unique_edges(pool: PgPool) {
    let repo = PostgresRepository::new(pool);
    let follower = user("f1");
    let followee = user("e1");

    assert_eq!(
        repo.subscribe(&follower, &followee).await.expect("first"),
        SubscribeOutcome::Subscribed
    );
    assert_eq!(
        repo.subscribe(&follower, &followee).await.expect("second"),
        SubscribeOutcome::AlreadySubscribed
    );
    assert!(matches!(
        repo.subscribe(&follower, &follower).await,
        Err(RepoError::SelfSubscription)
    ));

    let followees = repo.list_followees(&follower).await.expect("followees");
    assert_eq!(followees.len(), 1);
    assert!(followees.contains(&followee));
    let followers = repo.list_followers(&followee).await.expect("followers");
    assert!(followers.contains(&follower));
}

#[sqlx::test(migrations = "./migrations")]
async fn feed_appends_are_idempotent(pool: PgPool) {
    let repo = PostgresRepository::new(pool);
    let owner = user("0a");
    let author = user("0b");
    let mut posts = Vec::new();
    for i in 0..3 {
        posts.push(
            repo.create_post(&author, PostDraft::new(format!("p{i}")))
                .await
                .expect("create"),
        );
    }

    for post in posts.iter().chain(posts.iter()) {
        repo.append_feed_entry(FeedEntry::for_post(owner.clone(), post))
            .await
            .expect("append");
    }

    let page = repo
        .list_feed(&owner, &PageRequest::first(10).expect("size"))
        .await
        .expect("feed");
    let ids: Vec<PostId> = page.items.into_iter().map(|entry| entry.post_id).collect();
    let expected: Vec<PostId> = posts.iter().rev().map(|post| post.id.clone()).collect();
    assert_eq!(ids, expected);
    assert!(page.next_page.is_sentinel());
}

#[sqlx::test(migrations = "./migrations")]
async fn concurrent_creates_page_in_sequence_order(pool: PgPool) {
    let repo = Arc::new(PostgresRepository::new(pool));
    let author = user("d4");

    let mut tasks = JoinSet::new();
    for i in 0..16 {
        let repo = repo.clone();
        let author = author.clone();
        tasks.spawn(async move {
            repo.create_post(&author, PostDraft::new(format!("c{i}")))
                .await
        });
    }
    let mut created = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        created.push(joined.expect("join").expect("create"));
    }
    created.sort_by(|a, b| b.ordering_key.cmp(&a.ordering_key));

    let mut token = PageToken::sentinel();
    let mut seen = Vec::new();
    loop {
        let request = PageRequest::new(token, 4).expect("request");
        let page = repo
            .list_posts_by_author(&author, &request)
            .await
            .expect("page");
        seen.extend(page.items.into_iter().map(|post| post.id));
        if page.next_page.is_sentinel() {
            break;
        }
        token = page.next_page;
    }

    let expected: Vec<PostId> = created.iter().map(|post| post.id.clone()).collect();
    assert_eq!(seen, expected);
}
