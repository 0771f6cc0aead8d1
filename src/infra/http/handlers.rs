use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::application::error::AppError;
use crate::application::repos::RepoError;
use crate::domain::entities::PostDraft;
use crate::domain::types::{PostId, UserId};

use super::HttpState;
use super::identity::AuthorizedUser;
use super::models::{
    EditPostRequest, NewPostRequest, PageQuery, PostPageResponse, PostView, UsersResponse,
};

// Ids in the path that fail validation would not have matched a route.
fn path_post_id(raw: String) -> Result<PostId, AppError> {
    PostId::parse(raw).map_err(|_| AppError::Repo(RepoError::NotFound))
}

fn path_user_id(raw: String) -> Result<UserId, AppError> {
    UserId::parse(raw).map_err(|_| AppError::Repo(RepoError::NotFound))
}

pub async fn create_post(
    State(state): State<HttpState>,
    AuthorizedUser(user): AuthorizedUser,
    Json(body): Json<NewPostRequest>,
) -> Result<impl IntoResponse, AppError> {
    let post = state
        .timeline
        .create_post(&user, PostDraft::new(body.text))
        .await?;
    Ok(Json(PostView::from(post)))
}

pub async fn edit_post(
    State(state): State<HttpState>,
    AuthorizedUser(user): AuthorizedUser,
    Path(id): Path<String>,
    Json(body): Json<EditPostRequest>,
) -> Result<impl IntoResponse, AppError> {
    let post_id = path_post_id(id)?;
    let post = state.timeline.edit_post(&user, &post_id, body.text).await?;
    Ok(Json(PostView::from(post)))
}

pub async fn get_post(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let post_id = path_post_id(id)?;
    let post = state.timeline.get_post(&post_id).await?;
    Ok(Json(PostView::from(post)))
}

pub async fn list_posts(
    State(state): State<HttpState>,
    Path(user_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let author = path_user_id(user_id)?;
    let request = query.into_request()?;
    let page = state.timeline.list_posts(&author, &request).await?;
    Ok(Json(PostPageResponse::from(page)))
}

pub async fn subscribe(
    State(state): State<HttpState>,
    AuthorizedUser(user): AuthorizedUser,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let followee = path_user_id(user_id)?;
    state.timeline.subscribe(&user, &followee).await?;
    Ok(StatusCode::OK)
}

pub async fn subscriptions(
    State(state): State<HttpState>,
    AuthorizedUser(user): AuthorizedUser,
) -> Result<impl IntoResponse, AppError> {
    let users = state.timeline.subscriptions(&user).await?;
    Ok(Json(UsersResponse {
        users: users.into_iter().collect(),
    }))
}

pub async fn subscribers(
    State(state): State<HttpState>,
    AuthorizedUser(user): AuthorizedUser,
) -> Result<impl IntoResponse, AppError> {
    let users = state.timeline.subscribers(&user).await?;
    Ok(Json(UsersResponse {
        users: users.into_iter().collect(),
    }))
}

pub async fn feed(
    State(state): State<HttpState>,
    AuthorizedUser(user): AuthorizedUser,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let request = query.into_request()?;
    let page = state.timeline.read_feed(&user, &request).await?;
    Ok(Json(PostPageResponse::from(page)))
}

pub async fn ping() -> StatusCode {
    StatusCode::OK
}
