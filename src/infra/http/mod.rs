//! axum adapter over [`TimelineService`].

mod handlers;
mod identity;
mod middleware;
mod models;

pub use identity::{AuthorizedUser, USER_ID_HEADER};
pub use models::{
    DEFAULT_PAGE_SIZE, EditPostRequest, NewPostRequest, PageQuery, PostPageResponse, PostView,
    UsersResponse,
};

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::timeline::TimelineService;

#[derive(Clone)]
pub struct HttpState {
    pub timeline: TimelineService,
}

impl HttpState {
    pub fn new(timeline: TimelineService) -> Self {
        Self { timeline }
    }
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/api/v1/posts", post(handlers::create_post))
        .route(
            "/api/v1/posts/{id}",
            get(handlers::get_post).patch(handlers::edit_post),
        )
        .route("/api/v1/users/{user_id}/posts", get(handlers::list_posts))
        .route(
            "/api/v1/users/{user_id}/subscribe",
            post(handlers::subscribe),
        )
        .route("/api/v1/subscriptions", get(handlers::subscriptions))
        .route("/api/v1/subscribers", get(handlers::subscribers))
        .route("/api/v1/feed", get(handlers::feed))
        .route("/maintenance/ping", get(handlers::ping))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
