use std::fmt;

use jiff::civil::Date;
use serde::{Deserialize, Serialize};

const PROVISIONAL_PREFIX: &str = "tmp-";

/// Identifier of a cached record. Records created optimistically carry a
/// provisional id until the server assigns a real one.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Server(i32),
    Provisional(String),
}

impl RecordId {
    pub fn provisional(seq: u64) -> Self {
        Self::Provisional(format!("{PROVISIONAL_PREFIX}{seq}"))
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, RecordId::Provisional(_))
    }

    pub fn server(&self) -> Option<i32> {
        match self {
            RecordId::Server(id) => Some(*id),
            RecordId::Provisional(_) => None,
        }
    }
}

impl From<i32> for RecordId {
    fn from(id: i32) -> Self {
        Self::Server(id)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Server(id) => write!(f, "{id}"),
            RecordId::Provisional(tag) => f.write_str(tag),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub id: RecordId,
    pub name: String,
    pub release_date: Date,
    pub average_rating: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: RecordId,
    pub movie_id: i32,
    pub reviewer_name: Option<String>,
    pub rating: f64,
    pub review_comments: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewMovie {
    pub name: String,
    pub release_date: Date,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_rating: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MovieUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_date: Option<Date>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewReview {
    pub movie_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer_name: Option<String>,
    pub rating: f64,
    pub review_comments: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReviewUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer_name: Option<String>,
    pub rating: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_comments: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MovieEnvelope {
    pub movie: Movie,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ReviewEnvelope {
    pub review: Review,
    pub movie: Option<Movie>,
}

/// Mean rating rounded to two decimals, matching the server's aggregate.
pub fn average_rating(reviews: &[Review]) -> Option<f64> {
    if reviews.is_empty() {
        return None;
    }
    let sum: f64 = reviews.iter().map(|r| r.rating).sum();
    Some((sum / reviews.len() as f64 * 100.0).round() / 100.0)
}
