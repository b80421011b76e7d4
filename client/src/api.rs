use std::future::Future;

use reqwest::StatusCode;
use serde::{Deserialize, de::DeserializeOwned};
use tracing::debug;

use crate::{
    config::ClientConfig,
    error::{ClientError, ClientResult},
    models::{
        Movie, MovieEnvelope, MovieUpdate, NewMovie, NewReview, Review, ReviewEnvelope,
        ReviewUpdate,
    },
};

/// The REST surface the cache talks to.
pub trait Api: Send + Sync {
    fn list_movies(&self) -> impl Future<Output = ClientResult<Vec<Movie>>> + Send;

    fn get_movie(&self, id: i32) -> impl Future<Output = ClientResult<Movie>> + Send;

    fn create_movie(&self, new: &NewMovie) -> impl Future<Output = ClientResult<Movie>> + Send;

    fn update_movie(
        &self,
        id: i32,
        update: &MovieUpdate,
    ) -> impl Future<Output = ClientResult<Movie>> + Send;

    fn delete_movie(&self, id: i32) -> impl Future<Output = ClientResult<Movie>> + Send;

    /// Reviews of one movie. A movie without reviews yields an empty list.
    fn list_reviews(&self, movie_id: i32) -> impl Future<Output = ClientResult<Vec<Review>>> + Send;

    fn create_review(
        &self,
        new: &NewReview,
    ) -> impl Future<Output = ClientResult<ReviewEnvelope>> + Send;

    fn update_review(
        &self,
        id: i32,
        update: &ReviewUpdate,
    ) -> impl Future<Output = ClientResult<ReviewEnvelope>> + Send;

    fn delete_review(&self, id: i32) -> impl Future<Output = ClientResult<ReviewEnvelope>> + Send;
}

pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpApi {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent("moviecritic-client/0.1")
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, base_url: config.base_url.trim_end_matches('/').to_string() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> ClientResult<T> {
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }

        let message = match resp.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        debug!(status = status.as_u16(), message = %message, "api error");

        Err(match status {
            StatusCode::BAD_REQUEST => ClientError::Validation(message),
            StatusCode::NOT_FOUND => ClientError::NotFound(message),
            _ => ClientError::Server { status: status.as_u16(), message },
        })
    }
}

impl Api for HttpApi {
    async fn list_movies(&self) -> ClientResult<Vec<Movie>> {
        self.send(self.client.get(self.url("/movies"))).await
    }

    async fn get_movie(&self, id: i32) -> ClientResult<Movie> {
        self.send(self.client.get(self.url(&format!("/movies/{id}")))).await
    }

    async fn create_movie(&self, new: &NewMovie) -> ClientResult<Movie> {
        let out: MovieEnvelope = self.send(self.client.post(self.url("/movies")).json(new)).await?;
        Ok(out.movie)
    }

    async fn update_movie(&self, id: i32, update: &MovieUpdate) -> ClientResult<Movie> {
        let out: MovieEnvelope =
            self.send(self.client.put(self.url(&format!("/movies/{id}"))).json(update)).await?;
        Ok(out.movie)
    }

    async fn delete_movie(&self, id: i32) -> ClientResult<Movie> {
        let out: MovieEnvelope =
            self.send(self.client.delete(self.url(&format!("/movies/{id}")))).await?;
        Ok(out.movie)
    }

    async fn list_reviews(&self, movie_id: i32) -> ClientResult<Vec<Review>> {
        // The server answers 404 for a movie with no reviews.
        match self.send(self.client.get(self.url(&format!("/reviews/movie/{movie_id}")))).await {
            Err(ClientError::NotFound(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    async fn create_review(&self, new: &NewReview) -> ClientResult<ReviewEnvelope> {
        self.send(self.client.post(self.url("/reviews")).json(new)).await
    }

    async fn update_review(&self, id: i32, update: &ReviewUpdate) -> ClientResult<ReviewEnvelope> {
        self.send(self.client.put(self.url(&format!("/reviews/{id}"))).json(update)).await
    }

    async fn delete_review(&self, id: i32) -> ClientResult<ReviewEnvelope> {
        self.send(self.client.delete(self.url(&format!("/reviews/{id}")))).await
    }
}
