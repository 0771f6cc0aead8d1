//! Cache key definitions.
//!
//! Rendered keys are shared by every [`CacheStore`](super::CacheStore) so a
//! Redis deployment can be inspected with the usual tooling.

use std::fmt;

use crate::domain::types::{PostId, UserId};

/// Identifies one cached record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A single post, `post:{id}`.
    Post(PostId),
    /// First page of an author's posts, `posts:{author}`.
    AuthorPosts(UserId),
    /// First page of a user's feed, `feeds:{owner}`.
    Feed(UserId),
    /// Users someone follows, `subscriptions:{user}`.
    Subscriptions(UserId),
    /// Users following someone, `subscribers:{user}`.
    Subscribers(UserId),
}

impl CacheKey {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheKey::Post(_) => "post",
            CacheKey::AuthorPosts(_) => "posts",
            CacheKey::Feed(_) => "feeds",
            CacheKey::Subscriptions(_) => "subscriptions",
            CacheKey::Subscribers(_) => "subscribers",
        }
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Post(id) => write!(f, "post:{id}"),
            CacheKey::AuthorPosts(user)
            | CacheKey::Feed(user)
            | CacheKey::Subscriptions(user)
            | CacheKey::Subscribers(user) => write!(f, "{}:{user}", self.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_render_with_kind_prefix() {
        let user = UserId::parse("ab12").expect("user");
        let post = PostId::parse("00000000000000ff").expect("post");

        assert_eq!(CacheKey::Post(post).render(), "post:00000000000000ff");
        assert_eq!(CacheKey::AuthorPosts(user.clone()).render(), "posts:ab12");
        assert_eq!(CacheKey::Feed(user.clone()).render(), "feeds:ab12");
        assert_eq!(
            CacheKey::Subscriptions(user.clone()).render(),
            "subscriptions:ab12"
        );
        assert_eq!(CacheKey::Subscribers(user).render(), "subscribers:ab12");
    }
}
