//! View models rendered from cache contents.

use jiff::civil::Date;

use crate::{
    cache::{CacheKey, EntryState, QueryCache},
    error::ClientError,
    models::{Movie, RecordId, Review},
};

#[derive(Clone, Debug, PartialEq)]
pub struct MovieCard {
    pub id: RecordId,
    pub name: String,
    pub release_date: String,
    pub rating: String,
    pub pending: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReviewRow {
    pub id: RecordId,
    pub comments: String,
    pub rating: String,
    pub reviewer: String,
    pub pending: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// A transient, non-fatal notification about the outcome of a write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: &'static str,
    pub description: String,
}

impl Notice {
    pub fn for_result<T>(result: &Result<T, ClientError>, success: &str, failure: &str) -> Self {
        match result {
            Ok(_) => Self {
                level: NoticeLevel::Success,
                title: "Success",
                description: success.to_string(),
            },
            Err(ClientError::Validation(msg)) => Self {
                level: NoticeLevel::Error,
                title: "Error",
                description: format!("{failure}: {msg}"),
            },
            Err(_) => Self {
                level: NoticeLevel::Error,
                title: "Error",
                description: failure.to_string(),
            },
        }
    }
}

/// `7.0 / 10`, or `N/A / 10` when the movie has no reviews.
pub fn format_rating(avg: Option<f64>) -> String {
    match avg {
        Some(avg) => format!("{avg:.1} / 10"),
        None => "N/A / 10".to_string(),
    }
}

/// `October 22, 2021`.
pub fn format_date(date: Date) -> String {
    date.strftime("%B %-d, %Y").to_string()
}

/// Cards for the cached movie list, filtered by a case-insensitive name query.
pub fn movie_cards(cache: &QueryCache, query: &str) -> Vec<MovieCard> {
    let pending = cache.state(CacheKey::MovieList) == EntryState::OptimisticPending;
    let query = query.trim().to_lowercase();

    cache
        .movies()
        .unwrap_or_default()
        .iter()
        .filter(|m| m.name.to_lowercase().contains(&query))
        .map(|m| card(m, pending && m.id.is_provisional()))
        .collect()
}

pub fn movie_header(cache: &QueryCache, id: i32) -> Option<MovieCard> {
    let pending = cache.state(CacheKey::Movie(id)) == EntryState::OptimisticPending;
    cache.movie(id).map(|m| card(m, pending))
}

pub fn review_rows(cache: &QueryCache, movie_id: i32) -> Vec<ReviewRow> {
    cache.reviews(movie_id).unwrap_or_default().iter().map(row).collect()
}

fn card(movie: &Movie, pending: bool) -> MovieCard {
    MovieCard {
        id: movie.id.clone(),
        name: movie.name.clone(),
        release_date: format_date(movie.release_date),
        rating: format_rating(movie.average_rating),
        pending,
    }
}

fn row(review: &Review) -> ReviewRow {
    ReviewRow {
        id: review.id.clone(),
        comments: review.review_comments.clone(),
        rating: format!("{}/10", review.rating),
        reviewer: review.reviewer_name.clone().unwrap_or_else(|| "Anonymous".to_string()),
        pending: review.id.is_provisional(),
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use jiff::{Timestamp, civil::date};

    use super::*;
    use crate::{cache::CacheData, clock::ManualClock};

    fn movie(id: i32, name: &str, avg: Option<f64>) -> Movie {
        Movie { id: id.into(), name: name.to_string(), release_date: date(2021, 10, 22), average_rating: avg }
    }

    #[test]
    fn ratings_render_with_one_decimal() {
        assert_eq!(format_rating(Some(7.0)), "7.0 / 10");
        assert_eq!(format_rating(Some(8.33)), "8.3 / 10");
        assert_eq!(format_rating(None), "N/A / 10");
    }

    #[test]
    fn dates_render_long_form() {
        assert_eq!(format_date(date(2021, 10, 2)), "October 2, 2021");
    }

    #[test]
    fn cards_filter_by_name() {
        let clock = Arc::new(ManualClock::new(Timestamp::UNIX_EPOCH));
        let mut cache = QueryCache::new(clock, Duration::from_secs(60));
        let ticket = cache.begin_fetch(CacheKey::MovieList);
        cache.complete_fetch(
            ticket,
            CacheData::Movies(vec![movie(1, "Dune", Some(7.0)), movie(2, "Arrival", None)]),
        );

        let cards = movie_cards(&cache, "  dUN ");
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].name, "Dune");
        assert_eq!(cards[0].rating, "7.0 / 10");
        assert!(!cards[0].pending);

        assert_eq!(movie_cards(&cache, "").len(), 2);
    }

    #[test]
    fn failure_notice_is_an_error() {
        let result: Result<(), ClientError> = Err(ClientError::Timeout);
        let notice = Notice::for_result(&result, "Review added successfully", "Failed to add review");
        assert_eq!(notice.level, NoticeLevel::Error);
        assert_eq!(notice.description, "Failed to add review");
    }
}
