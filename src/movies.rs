use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tracing::debug;

use crate::{
    db::Db,
    entities::{movie, review},
    error::{AppError, AppResult},
    models::{MovieChanges, NewMovie},
};

#[derive(Clone)]
pub struct MovieStore {
    db: Db,
}

impl MovieStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn create(&self, new: NewMovie) -> AppResult<movie::Model> {
        let model = movie::ActiveModel {
            name: Set(new.name),
            release_date: Set(new.release_date.to_string()),
            average_rating: Set(new.average_rating),
            ..Default::default()
        };
        let _writer = self.db.writer().await;
        let movie = model.insert(&self.db.conn).await?;
        debug!(movie_id = movie.id, name = %movie.name, "created movie");
        Ok(movie)
    }

    pub async fn read(&self, id: i32) -> AppResult<movie::Model> {
        movie::Entity::find_by_id(id)
            .one(&self.db.conn)
            .await?
            .ok_or_else(|| AppError::not_found("movie not found"))
    }

    pub async fn list(&self) -> AppResult<Vec<movie::Model>> {
        Ok(movie::Entity::find().order_by_asc(movie::Column::Id).all(&self.db.conn).await?)
    }

    pub async fn update(&self, id: i32, changes: MovieChanges) -> AppResult<movie::Model> {
        let _writer = self.db.writer().await;
        let current = self.read(id).await?;
        if changes == MovieChanges::default() {
            return Ok(current);
        }

        let mut model: movie::ActiveModel = current.into();
        if let Some(name) = changes.name {
            model.name = Set(name);
        }
        if let Some(date) = changes.release_date {
            model.release_date = Set(date.to_string());
        }
        if let Some(seed) = changes.average_rating {
            model.average_rating = Set(Some(seed));
        }

        let movie = model.update(&self.db.conn).await?;
        debug!(movie_id = movie.id, "updated movie");
        Ok(movie)
    }

    /// Deletes a movie together with all of its reviews.
    pub async fn delete(&self, id: i32) -> AppResult<movie::Model> {
        let _writer = self.db.writer().await;
        let txn = self.db.conn.begin().await?;

        let movie = movie::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::not_found("movie not found"))?;

        let removed = review::Entity::delete_many()
            .filter(review::Column::MovieId.eq(id))
            .exec(&txn)
            .await?;

        movie::Entity::delete_by_id(id).exec(&txn).await?;

        txn.commit().await?;

        debug!(movie_id = id, reviews_removed = removed.rows_affected, "deleted movie");
        Ok(movie)
    }
}
