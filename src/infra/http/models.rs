use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::application::error::AppError;
use crate::application::pagination::{CursorPage, MAX_PAGE_SIZE, PageRequest};
use crate::domain::entities::Post;
use crate::domain::types::{PageToken, PostId, UserId};

pub const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Deserialize, Serialize)]
pub struct NewPostRequest {
    pub text: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EditPostRequest {
    pub text: String,
}

/// `?page=&size=` as sent by clients; both are optional.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub size: Option<String>,
}

impl PageQuery {
    pub fn into_request(self) -> Result<PageRequest, AppError> {
        let size = match self.size.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_PAGE_SIZE,
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|size| (1..=MAX_PAGE_SIZE).contains(size))
                .ok_or_else(|| {
                    AppError::validation(format!("size must be between 1 and {MAX_PAGE_SIZE}"))
                })?,
        };
        let token = PageToken::parse(self.page.as_deref())?;
        Ok(PageRequest::new(token, size)?)
    }
}

/// Public view of a post. The ordering key stays internal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub id: PostId,
    pub text: String,
    pub author_id: UserId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified_at: OffsetDateTime,
}

impl From<Post> for PostView {
    fn from(post: Post) -> Self {
        Self {
            id: post.id,
            text: post.text,
            author_id: post.author_id,
            created_at: post.created_at,
            last_modified_at: post.last_modified_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPageResponse {
    pub posts: Vec<PostView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page: Option<String>,
}

impl From<CursorPage<Post>> for PostPageResponse {
    fn from(page: CursorPage<Post>) -> Self {
        let next_page = (!page.is_last()).then(|| page.next_page.as_str().to_string());
        Self {
            posts: page.items.into_iter().map(PostView::from).collect(),
            next_page,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsersResponse {
    pub users: Vec<UserId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(page: Option<&str>, size: Option<&str>) -> PageQuery {
        PageQuery {
            page: page.map(str::to_string),
            size: size.map(str::to_string),
        }
    }

    #[test]
    fn size_defaults_to_ten() {
        let request = query(None, None).into_request().expect("request");
        assert_eq!(request.size(), DEFAULT_PAGE_SIZE);
        assert!(request.is_first());
    }

    #[test]
    fn size_outside_range_is_rejected() {
        for raw in ["0", "101", "-1", "ten"] {
            let err = query(None, Some(raw)).into_request().expect_err(raw);
            assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        }
        assert_eq!(
            query(None, Some("100")).into_request().expect("max").size(),
            100
        );
    }

    #[test]
    fn malformed_page_token_is_rejected() {
        let err = query(Some("not a token!"), None)
            .into_request()
            .expect_err("bad token");
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn sentinel_next_page_is_omitted() {
        let page: CursorPage<Post> = CursorPage::empty();
        let body = serde_json::to_value(PostPageResponse::from(page)).expect("json");
        assert_eq!(body, serde_json::json!({ "posts": [] }));
    }
}
