use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use tracing::debug;

use crate::{
    db::Db,
    entities::{movie, review},
    error::{AppError, AppResult},
    models::{NewReview, ReviewChanges, ReviewEnvelope},
    rating,
};

#[derive(Clone)]
pub struct ReviewStore {
    db: Db,
}

impl ReviewStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn create(&self, new: NewReview) -> AppResult<ReviewEnvelope> {
        let _writer = self.db.writer().await;
        let txn = self.db.conn.begin().await?;

        if movie::Entity::find_by_id(new.movie_id).one(&txn).await?.is_none() {
            return Err(AppError::not_found("movie not found"));
        }

        let review = review::ActiveModel {
            movie_id: Set(new.movie_id),
            reviewer_name: Set(new.reviewer_name),
            rating: Set(new.rating),
            review_comments: Set(new.review_comments),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let movie = settle(&txn, review.movie_id).await?;
        txn.commit().await?;

        debug!(review_id = review.id, movie_id = review.movie_id, "created review");
        Ok(ReviewEnvelope { review, movie })
    }

    pub async fn read(&self, id: i32) -> AppResult<review::Model> {
        review::Entity::find_by_id(id)
            .one(&self.db.conn)
            .await?
            .ok_or_else(|| AppError::not_found("review not found"))
    }

    pub async fn list_by_movie(&self, movie_id: i32) -> AppResult<Vec<review::Model>> {
        Ok(review::Entity::find()
            .filter(review::Column::MovieId.eq(movie_id))
            .order_by_asc(review::Column::Id)
            .all(&self.db.conn)
            .await?)
    }

    /// Case-insensitive substring match on the reviewer name.
    pub async fn search_by_reviewer(&self, needle: &str) -> AppResult<Vec<review::Model>> {
        // SQLite LIKE folds ASCII case.
        Ok(review::Entity::find()
            .filter(review::Column::ReviewerName.contains(needle))
            .order_by_asc(review::Column::Id)
            .all(&self.db.conn)
            .await?)
    }

    pub async fn update(&self, id: i32, changes: ReviewChanges) -> AppResult<ReviewEnvelope> {
        let _writer = self.db.writer().await;
        let txn = self.db.conn.begin().await?;

        let current = review::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::not_found("review not found"))?;

        let mut model: review::ActiveModel = current.into();
        model.rating = Set(changes.rating);
        if let Some(name) = changes.reviewer_name {
            model.reviewer_name = Set(Some(name));
        }
        if let Some(comments) = changes.review_comments {
            model.review_comments = Set(comments);
        }
        let review = model.update(&txn).await?;

        let movie = settle(&txn, review.movie_id).await?;
        txn.commit().await?;

        debug!(review_id = review.id, movie_id = review.movie_id, "updated review");
        Ok(ReviewEnvelope { review, movie })
    }

    pub async fn delete(&self, id: i32) -> AppResult<ReviewEnvelope> {
        let _writer = self.db.writer().await;
        let txn = self.db.conn.begin().await?;

        let review = review::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::not_found("review not found"))?;

        review::Entity::delete_by_id(id).exec(&txn).await?;

        let movie = settle(&txn, review.movie_id).await?;
        txn.commit().await?;

        debug!(review_id = id, movie_id = review.movie_id, "deleted review");
        Ok(ReviewEnvelope { review, movie })
    }
}

/// Runs the aggregate hook and reads back the parent movie inside the same
/// transaction as the review write.
async fn settle<C: ConnectionTrait>(conn: &C, movie_id: i32) -> AppResult<Option<movie::Model>> {
    rating::on_reviews_changed(conn, movie_id).await?;
    Ok(movie::Entity::find_by_id(movie_id).one(conn).await?)
}
