//! Shared cursor pagination helpers.
//!
//! Every backend pages the same way: fetch up to `size + 1` items older than
//! the cursor, newest first, and derive the next token from the boundary item.
//! Keyed backends encode the boundary into a self-describing cursor scoped to
//! one owner and one collection; the transient store issues opaque checkpoint
//! handles instead but reuses [`take_page`] for the split.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::types::{OrderingKey, PageToken, UserId};

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Ordered per-owner collection a page token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Posts,
    Feed,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Posts => "posts",
            Collection::Feed => "feed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyCursorPayload {
    collection: Collection,
    owner: UserId,
    key: String,
}

/// Boundary cursor for keyed backends: the last item already emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCursor {
    collection: Collection,
    owner: UserId,
    key: OrderingKey,
}

impl KeyCursor {
    pub fn new(collection: Collection, owner: UserId, key: OrderingKey) -> Self {
        Self {
            collection,
            owner,
            key,
        }
    }

    pub fn key(&self) -> OrderingKey {
        self.key
    }

    pub fn encode(&self) -> PageToken {
        let payload = KeyCursorPayload {
            collection: self.collection,
            owner: self.owner.clone(),
            key: self.key.to_hex(),
        };
        let serialized =
            serde_json::to_vec(&payload).expect("serializing key cursor payload should succeed");
        PageToken::issued(URL_SAFE_NO_PAD.encode(serialized))
    }

    /// Decode `token` and confirm it was issued for `collection` of `owner`.
    pub fn decode(
        token: &PageToken,
        collection: Collection,
        owner: &UserId,
    ) -> Result<Self, PaginationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.as_str())
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        let payload: KeyCursorPayload = serde_json::from_slice(&bytes)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;

        if payload.collection != collection {
            return Err(PaginationError::ScopeMismatch(format!(
                "cursor belongs to `{}`, not `{}`",
                payload.collection.as_str(),
                collection.as_str()
            )));
        }
        if &payload.owner != owner {
            return Err(PaginationError::ScopeMismatch(format!(
                "cursor belongs to another owner than `{owner}`"
            )));
        }
        let key = OrderingKey::from_hex(&payload.key)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;

        Ok(Self {
            collection,
            owner: owner.clone(),
            key,
        })
    }
}

/// Cursor-aware pagination request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    token: PageToken,
    size: u32,
}

impl PageRequest {
    pub fn new(token: PageToken, size: u32) -> Result<Self, PaginationError> {
        if size == 0 {
            return Err(PaginationError::InvalidSize(size));
        }
        Ok(Self { token, size })
    }

    pub fn first(size: u32) -> Result<Self, PaginationError> {
        Self::new(PageToken::sentinel(), size)
    }

    pub fn token(&self) -> &PageToken {
        &self.token
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn is_first(&self) -> bool {
        self.token.is_sentinel()
    }

    /// Rows to fetch: one beyond the page to learn whether more remain.
    pub fn fetch_limit(&self) -> usize {
        self.size as usize + 1
    }
}

/// Cursor-aware page result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub next_page: PageToken,
}

impl<T> CursorPage<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_page: PageToken::sentinel(),
        }
    }

    pub fn new(items: Vec<T>, next_page: PageToken) -> Self {
        Self { items, next_page }
    }

    pub fn is_last(&self) -> bool {
        self.next_page.is_sentinel()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> CursorPage<U> {
        CursorPage {
            items: self.items.into_iter().map(f).collect(),
            next_page: self.next_page,
        }
    }
}

/// Result of splitting an `n + 1` fetch.
#[derive(Debug)]
pub struct PageSlice<T> {
    pub items: Vec<T>,
    /// First item of the following page, when one exists.
    pub overflow: Option<T>,
}

impl<T> PageSlice<T> {
    pub fn has_more(&self) -> bool {
        self.overflow.is_some()
    }
}

/// Split rows fetched with [`PageRequest::fetch_limit`] into the emitted page
/// and the optional look-ahead item.
pub fn take_page<T>(mut rows: Vec<T>, size: u32) -> PageSlice<T> {
    let size = size as usize;
    let overflow = if rows.len() > size {
        rows.truncate(size + 1);
        rows.pop()
    } else {
        None
    };
    PageSlice {
        items: rows,
        overflow,
    }
}

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
    #[error("cursor scope mismatch: {0}")]
    ScopeMismatch(String),
    #[error("page size must be between 1 and {MAX_PAGE_SIZE}, got {0}")]
    InvalidSize(u32),
}
