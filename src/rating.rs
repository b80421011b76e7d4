//! Aggregate rating maintenance.
//!
//! Every review write path calls [`on_reviews_changed`] on the same connection
//! (usually a transaction) that performed the write, so the stored
//! `average_rating` never lags behind the review set.

use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QuerySelect,
    sea_query::Expr,
};
use tracing::debug;

use crate::entities::{movie, review};

/// Mean of `ratings` rounded to two decimal places, or `None` when empty.
pub fn average(ratings: &[f64]) -> Option<f64> {
    if ratings.is_empty() {
        return None;
    }
    let sum: f64 = ratings.iter().sum();
    Some(round2(sum / ratings.len() as f64))
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Recomputes the average rating of `movie_id` from scratch and persists it.
///
/// Returns the new average. If the movie no longer exists the update touches
/// no rows and this is a no-op.
pub async fn on_reviews_changed<C>(conn: &C, movie_id: i32) -> Result<Option<f64>, DbErr>
where
    C: ConnectionTrait,
{
    let ratings: Vec<f64> = review::Entity::find()
        .select_only()
        .column(review::Column::Rating)
        .filter(review::Column::MovieId.eq(movie_id))
        .into_tuple()
        .all(conn)
        .await?;

    let avg = average(&ratings);

    let res = movie::Entity::update_many()
        .col_expr(movie::Column::AverageRating, Expr::value(avg))
        .filter(movie::Column::Id.eq(movie_id))
        .exec(conn)
        .await?;

    if res.rows_affected == 0 {
        debug!(movie_id = movie_id, "movie gone, skipping aggregate update");
    } else {
        debug!(movie_id = movie_id, reviews = ratings.len(), average = ?avg, "recomputed average rating");
    }

    Ok(avg)
}

#[cfg(test)]
mod tests {
    use sea_orm::{ActiveModelTrait, Set};

    use super::*;
    use crate::db;

    #[test]
    fn average_of_nothing_is_none() {
        assert_eq!(average(&[]), None);
    }

    #[test]
    fn average_rounds_to_two_places() {
        assert_eq!(average(&[8.0, 6.0]), Some(7.0));
        assert_eq!(average(&[10.0, 0.0, 0.0]), Some(3.33));
        assert_eq!(average(&[6.5, 7.0, 7.0]), Some(6.83));
    }

    #[tokio::test]
    async fn recompute_for_missing_movie_is_a_noop() {
        let db = db::memory().await;
        assert_eq!(on_reviews_changed(&db.conn, 404).await.unwrap(), None);
    }

    #[tokio::test]
    async fn recompute_replaces_seeded_average() {
        let db = db::memory().await;
        let movie = movie::ActiveModel {
            name: Set("Dune".to_string()),
            release_date: Set("2021-10-22".to_string()),
            average_rating: Set(Some(1.0)),
            ..Default::default()
        }
        .insert(&db.conn)
        .await
        .unwrap();

        for rating in [8.0, 6.0] {
            review::ActiveModel {
                movie_id: Set(movie.id),
                reviewer_name: Set(None),
                rating: Set(rating),
                review_comments: Set(String::new()),
                ..Default::default()
            }
            .insert(&db.conn)
            .await
            .unwrap();
        }

        assert_eq!(on_reviews_changed(&db.conn, movie.id).await.unwrap(), Some(7.0));
        let stored = movie::Entity::find_by_id(movie.id).one(&db.conn).await.unwrap().unwrap();
        assert_eq!(stored.average_rating, Some(7.0));
    }
}
