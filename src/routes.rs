use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    routing::get,
};
use serde_json::{Value, json};

use crate::{
    AppState,
    entities::{movie, review},
    error::{AppError, AppResult},
    models::{
        CreateMovieRequest, CreateReviewRequest, MovieEnvelope, ReviewEnvelope, ReviewSearchQuery,
        UpdateMovieRequest, UpdateReviewRequest,
    },
};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(hello))
        .route("/movies", get(list_movies).post(create_movie))
        .route("/movies/{id}", get(get_movie).put(update_movie).delete(delete_movie))
        .route("/reviews", axum::routing::post(create_review))
        .route("/reviews/search", get(search_reviews))
        .route("/reviews/movie/{movie_id}", get(list_reviews))
        .route("/reviews/{id}", get(get_review).put(update_review).delete(delete_review))
        .with_state(state)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload.map(|Json(v)| v).map_err(|rej| AppError::validation(rej.body_text()))
}

fn path_id(path: Result<Path<i32>, PathRejection>) -> AppResult<i32> {
    path.map(|Path(id)| id).map_err(|rej| AppError::validation(rej.body_text()))
}

pub async fn hello() -> Json<Value> {
    Json(json!({ "hello": "world" }))
}

pub async fn list_movies(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<movie::Model>>> {
    Ok(Json(state.movies.list().await?))
}

pub async fn create_movie(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateMovieRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<MovieEnvelope>)> {
    let new = body(payload)?.validate()?;
    let movie = state.movies.create(new).await?;
    Ok((StatusCode::CREATED, Json(MovieEnvelope { movie })))
}

pub async fn get_movie(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i32>, PathRejection>,
) -> AppResult<Json<movie::Model>> {
    let id = path_id(path)?;
    Ok(Json(state.movies.read(id).await?))
}

pub async fn update_movie(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i32>, PathRejection>,
    payload: Result<Json<UpdateMovieRequest>, JsonRejection>,
) -> AppResult<Json<MovieEnvelope>> {
    let id = path_id(path)?;
    let changes = body(payload)?.validate()?;
    let movie = state.movies.update(id, changes).await?;
    Ok(Json(MovieEnvelope { movie }))
}

pub async fn delete_movie(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i32>, PathRejection>,
) -> AppResult<Json<MovieEnvelope>> {
    let id = path_id(path)?;
    let movie = state.movies.delete(id).await?;
    Ok(Json(MovieEnvelope { movie }))
}

pub async fn create_review(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateReviewRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ReviewEnvelope>)> {
    let new = body(payload)?.validate()?;
    let out = state.reviews.create(new).await?;
    Ok((StatusCode::CREATED, Json(out)))
}

pub async fn list_reviews(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i32>, PathRejection>,
) -> AppResult<Json<Vec<review::Model>>> {
    let movie_id = path_id(path)?;
    let reviews = state.reviews.list_by_movie(movie_id).await?;
    if reviews.is_empty() {
        return Err(AppError::not_found("no reviews found for this movie"));
    }
    Ok(Json(reviews))
}

pub async fn search_reviews(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ReviewSearchQuery>,
) -> AppResult<Json<Vec<review::Model>>> {
    let needle = q.reviewer_name.as_deref().map(str::trim).unwrap_or_default();
    if needle.is_empty() {
        return Err(AppError::validation("reviewer name is required to search"));
    }
    Ok(Json(state.reviews.search_by_reviewer(needle).await?))
}

pub async fn get_review(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i32>, PathRejection>,
) -> AppResult<Json<review::Model>> {
    let id = path_id(path)?;
    Ok(Json(state.reviews.read(id).await?))
}

pub async fn update_review(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i32>, PathRejection>,
    payload: Result<Json<UpdateReviewRequest>, JsonRejection>,
) -> AppResult<Json<ReviewEnvelope>> {
    let id = path_id(path)?;
    let changes = body(payload)?.validate()?;
    Ok(Json(state.reviews.update(id, changes).await?))
}

pub async fn delete_review(
    State(state): State<Arc<AppState>>,
    path: Result<Path<i32>, PathRejection>,
) -> AppResult<Json<ReviewEnvelope>> {
    let id = path_id(path)?;
    Ok(Json(state.reviews.delete(id).await?))
}
