use jiff::{Timestamp, civil::Date};
use serde::{Deserialize, Serialize};

use crate::{
    entities::{movie, review},
    error::{AppError, AppResult},
};

pub const MIN_RATING: f64 = 0.0;
pub const MAX_RATING: f64 = 10.0;

/// A rating as it arrives over the wire: clients send either a JSON number
/// or a numeric string.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum RatingInput {
    Number(f64),
    Text(String),
}

impl RatingInput {
    pub fn value(&self) -> AppResult<f64> {
        let value = match self {
            RatingInput::Number(n) => *n,
            RatingInput::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| AppError::validation("rating must be a number"))?,
        };
        validate_rating(value)
    }
}

pub fn validate_rating(value: f64) -> AppResult<f64> {
    if !value.is_finite() || !(MIN_RATING..=MAX_RATING).contains(&value) {
        return Err(AppError::validation("rating must be between 0 and 10"));
    }
    Ok(value)
}

/// Parses a release date given either as a calendar date or as an RFC 3339
/// timestamp, which is reduced to its UTC date.
pub fn parse_release_date(raw: &str) -> AppResult<Date> {
    let raw = raw.trim();
    if let Ok(date) = raw.parse::<Date>() {
        return Ok(date);
    }
    let ts: Timestamp = raw.parse()?;
    Ok(ts.to_zoned(jiff::tz::TimeZone::UTC).date())
}

fn validate_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation("movie name is required"));
    }
    Ok(name.to_string())
}

#[derive(Debug, Deserialize)]
pub struct CreateMovieRequest {
    pub name: Option<String>,
    pub release_date: Option<String>,
    pub average_rating: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewMovie {
    pub name: String,
    pub release_date: Date,
    pub average_rating: Option<f64>,
}

impl CreateMovieRequest {
    pub fn validate(self) -> AppResult<NewMovie> {
        let (Some(name), Some(release_date)) = (self.name, self.release_date) else {
            return Err(AppError::validation("movie name and release date are required"));
        };
        Ok(NewMovie {
            name: validate_name(&name)?,
            release_date: parse_release_date(&release_date)?,
            average_rating: self.average_rating.map(validate_rating).transpose()?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateMovieRequest {
    pub name: Option<String>,
    pub release_date: Option<String>,
    pub average_rating: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MovieChanges {
    pub name: Option<String>,
    pub release_date: Option<Date>,
    pub average_rating: Option<f64>,
}

impl UpdateMovieRequest {
    pub fn validate(self) -> AppResult<MovieChanges> {
        Ok(MovieChanges {
            name: self.name.as_deref().map(validate_name).transpose()?,
            release_date: self.release_date.as_deref().map(parse_release_date).transpose()?,
            average_rating: self.average_rating.map(validate_rating).transpose()?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateReviewRequest {
    pub movie_id: Option<i32>,
    pub reviewer_name: Option<String>,
    pub rating: Option<RatingInput>,
    pub review_comments: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewReview {
    pub movie_id: i32,
    pub reviewer_name: Option<String>,
    pub rating: f64,
    pub review_comments: String,
}

impl CreateReviewRequest {
    pub fn validate(self) -> AppResult<NewReview> {
        let (Some(movie_id), Some(rating)) = (self.movie_id, self.rating) else {
            return Err(AppError::validation("movie id and rating are required"));
        };
        Ok(NewReview {
            movie_id,
            reviewer_name: normalize_reviewer(self.reviewer_name),
            rating: rating.value()?,
            review_comments: self.review_comments.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateReviewRequest {
    pub reviewer_name: Option<String>,
    pub rating: Option<RatingInput>,
    pub review_comments: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReviewChanges {
    pub reviewer_name: Option<String>,
    pub rating: f64,
    pub review_comments: Option<String>,
}

impl UpdateReviewRequest {
    pub fn validate(self) -> AppResult<ReviewChanges> {
        let Some(rating) = self.rating else {
            return Err(AppError::validation("rating is required"));
        };
        Ok(ReviewChanges {
            reviewer_name: normalize_reviewer(self.reviewer_name),
            rating: rating.value()?,
            review_comments: self.review_comments,
        })
    }
}

fn normalize_reviewer(name: Option<String>) -> Option<String> {
    name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

#[derive(Debug, Deserialize)]
pub struct ReviewSearchQuery {
    pub reviewer_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MovieEnvelope {
    pub movie: movie::Model,
}

/// A review write together with the parent movie as it stands after the
/// aggregate was recomputed.
#[derive(Debug, Serialize)]
pub struct ReviewEnvelope {
    pub review: review::Model,
    pub movie: Option<movie::Model>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_bounds_are_inclusive() {
        assert!(validate_rating(0.0).is_ok());
        assert!(validate_rating(10.0).is_ok());
        assert!(validate_rating(-1.0).is_err());
        assert!(validate_rating(11.0).is_err());
        assert!(validate_rating(f64::NAN).is_err());
    }

    #[test]
    fn rating_accepts_numeric_strings() {
        let input: RatingInput = serde_json::from_str("\"7.5\"").unwrap();
        assert_eq!(input.value().unwrap(), 7.5);

        let input: RatingInput = serde_json::from_str("\"great\"").unwrap();
        assert!(matches!(input.value(), Err(AppError::Validation(_))));
    }

    #[test]
    fn release_date_accepts_dates_and_timestamps() {
        assert_eq!(parse_release_date("2021-10-22").unwrap(), jiff::civil::date(2021, 10, 22));
        assert_eq!(
            parse_release_date("2021-10-22T18:30:00Z").unwrap(),
            jiff::civil::date(2021, 10, 22)
        );
        assert!(parse_release_date("next friday").is_err());
    }

    #[test]
    fn create_movie_requires_name_and_date() {
        let req = CreateMovieRequest {
            name: Some("   ".to_string()),
            release_date: Some("2021-10-22".to_string()),
            average_rating: None,
        };
        assert!(matches!(req.validate(), Err(AppError::Validation(_))));

        let req = CreateMovieRequest { name: Some("Dune".to_string()), release_date: None, average_rating: None };
        assert!(matches!(req.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn create_review_requires_rating() {
        let req = CreateReviewRequest {
            movie_id: Some(1),
            reviewer_name: None,
            rating: None,
            review_comments: Some("fine".to_string()),
        };
        assert!(matches!(req.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn blank_reviewer_name_is_dropped() {
        let req = CreateReviewRequest {
            movie_id: Some(1),
            reviewer_name: Some("  ".to_string()),
            rating: Some(RatingInput::Number(0.0)),
            review_comments: None,
        };
        let review = req.validate().unwrap();
        assert_eq!(review.reviewer_name, None);
        assert_eq!(review.rating, 0.0);
        assert_eq!(review.review_comments, "");
    }
}
