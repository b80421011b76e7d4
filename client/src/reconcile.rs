//! Optimistic write protocol.
//!
//! Each write runs in three steps against an explicit [`QueryCache`]:
//!
//! 1. [`snapshot`] the keys the write can affect,
//! 2. apply the speculative change (`apply_*`),
//! 3. on success reconcile with the server's records (`commit_*`), on failure
//!    [`revert`] to the snapshot.
//!
//! A key that is not cached is never created speculatively; commit only
//! refreshes keys that are already present, except for the detail key of a
//! freshly created movie.

use tracing::{debug, warn};

use crate::{
    cache::{CacheData, CacheKey, QueryCache},
    models::{Movie, MovieUpdate, RecordId, Review, ReviewEnvelope, ReviewUpdate, average_rating},
};

/// Cache contents captured before an optimistic write.
#[derive(Clone, Debug)]
pub struct Snapshot {
    entries: Vec<(CacheKey, Option<CacheData>)>,
}

/// Keys that depend on movie `id`: the list, its detail and its reviews. Any
/// write to the movie or to one of its reviews can change all three.
pub fn movie_keys(id: i32) -> Vec<CacheKey> {
    vec![CacheKey::MovieList, CacheKey::Movie(id), CacheKey::Reviews(id)]
}

pub fn snapshot(cache: &QueryCache, keys: &[CacheKey]) -> Snapshot {
    Snapshot { entries: keys.iter().map(|key| (*key, cache.get(*key).cloned())).collect() }
}

/// Restores every captured key exactly as it was; restored entries are stale.
pub fn revert(cache: &mut QueryCache, snapshot: Snapshot) {
    let keys: Vec<CacheKey> = snapshot.entries.iter().map(|(key, _)| *key).collect();
    cache.outdate_fetches(&keys);
    for (key, data) in snapshot.entries {
        cache.restore(key, data);
    }
    warn!("optimistic write rolled back");
}

pub fn apply_add_review(cache: &mut QueryCache, review: Review) {
    let movie_id = review.movie_id;
    cache.speculate(CacheKey::Reviews(movie_id), |data| {
        if let CacheData::Reviews(reviews) = data {
            reviews.push(review);
        }
    });
    speculate_average(cache, movie_id);
}

pub fn commit_add_review(cache: &mut QueryCache, provisional: &RecordId, confirmed: &ReviewEnvelope) {
    let review = &confirmed.review;
    if let Some(id) = review.id.server() {
        cache.record_resolution(provisional.clone(), id);
    }

    let key = CacheKey::Reviews(review.movie_id);
    if let Some(CacheData::Reviews(reviews)) = cache.pending_mut(key) {
        let already_listed = reviews.iter().any(|r| r.id == review.id);
        if already_listed {
            reviews.retain(|r| &r.id != provisional);
        } else if let Some(slot) = reviews.iter_mut().find(|r| &r.id == provisional) {
            *slot = review.clone();
        } else {
            reviews.push(review.clone());
        }
        let reviews = reviews.clone();
        cache.settle(key, CacheData::Reviews(reviews));
    }

    commit_parent(cache, review.movie_id, confirmed.movie.as_ref());
    debug!(provisional = %provisional, id = %review.id, "review reconciled");
}

pub fn apply_update_review(cache: &mut QueryCache, movie_id: i32, id: i32, update: &ReviewUpdate) {
    cache.speculate(CacheKey::Reviews(movie_id), |data| {
        if let CacheData::Reviews(reviews) = data {
            if let Some(review) = reviews.iter_mut().find(|r| r.id == RecordId::Server(id)) {
                review.rating = update.rating;
                if let Some(name) = &update.reviewer_name {
                    review.reviewer_name = Some(name.clone());
                }
                if let Some(comments) = &update.review_comments {
                    review.review_comments = comments.clone();
                }
            }
        }
    });
    speculate_average(cache, movie_id);
}

pub fn commit_update_review(cache: &mut QueryCache, confirmed: &ReviewEnvelope) {
    let review = &confirmed.review;
    let key = CacheKey::Reviews(review.movie_id);
    if let Some(CacheData::Reviews(reviews)) = cache.pending_mut(key) {
        match reviews.iter_mut().find(|r| r.id == review.id) {
            Some(slot) => *slot = review.clone(),
            None => reviews.push(review.clone()),
        }
        let reviews = reviews.clone();
        cache.settle(key, CacheData::Reviews(reviews));
    }
    commit_parent(cache, review.movie_id, confirmed.movie.as_ref());
}

pub fn apply_delete_review(cache: &mut QueryCache, movie_id: i32, id: i32) {
    cache.speculate(CacheKey::Reviews(movie_id), |data| {
        if let CacheData::Reviews(reviews) = data {
            reviews.retain(|r| r.id != RecordId::Server(id));
        }
    });
    speculate_average(cache, movie_id);
}

pub fn commit_delete_review(cache: &mut QueryCache, confirmed: &ReviewEnvelope) {
    let review = &confirmed.review;
    let key = CacheKey::Reviews(review.movie_id);
    if let Some(CacheData::Reviews(reviews)) = cache.pending_mut(key) {
        reviews.retain(|r| r.id != review.id);
        let reviews = reviews.clone();
        cache.settle(key, CacheData::Reviews(reviews));
    }
    commit_parent(cache, review.movie_id, confirmed.movie.as_ref());
}

pub fn apply_add_movie(cache: &mut QueryCache, movie: Movie) {
    cache.speculate(CacheKey::MovieList, |data| {
        if let CacheData::Movies(movies) = data {
            movies.push(movie);
        }
    });
}

pub fn commit_add_movie(cache: &mut QueryCache, provisional: &RecordId, movie: &Movie) {
    let Some(id) = movie.id.server() else {
        return;
    };
    cache.record_resolution(provisional.clone(), id);
    cache.outdate_fetches(&movie_keys(id));

    if let Some(CacheData::Movies(movies)) = cache.pending_mut(CacheKey::MovieList) {
        let already_listed = movies.iter().any(|m| m.id == movie.id);
        if already_listed {
            movies.retain(|m| &m.id != provisional);
        } else if let Some(slot) = movies.iter_mut().find(|m| &m.id == provisional) {
            *slot = movie.clone();
        } else {
            movies.push(movie.clone());
        }
        let movies = movies.clone();
        cache.settle(CacheKey::MovieList, CacheData::Movies(movies));
    }
    cache.settle(CacheKey::Movie(id), CacheData::Movie(movie.clone()));
    debug!(provisional = %provisional, id = id, "movie reconciled");
}

pub fn apply_update_movie(cache: &mut QueryCache, id: i32, update: &MovieUpdate) {
    let patch = |movie: &mut Movie| {
        if let Some(name) = &update.name {
            movie.name = name.clone();
        }
        if let Some(date) = update.release_date {
            movie.release_date = date;
        }
    };
    cache.speculate(CacheKey::Movie(id), |data| {
        if let CacheData::Movie(movie) = data {
            patch(movie);
        }
    });
    cache.speculate(CacheKey::MovieList, |data| {
        if let CacheData::Movies(movies) = data {
            movies.iter_mut().filter(|m| m.id == RecordId::Server(id)).for_each(patch);
        }
    });
}

pub fn commit_update_movie(cache: &mut QueryCache, movie: &Movie) {
    let Some(id) = movie.id.server() else {
        return;
    };
    commit_parent(cache, id, Some(movie));
}

pub fn apply_delete_movie(cache: &mut QueryCache, id: i32) {
    cache.speculate(CacheKey::MovieList, |data| {
        if let CacheData::Movies(movies) = data {
            movies.retain(|m| m.id != RecordId::Server(id));
        }
    });
    cache.remove(CacheKey::Movie(id));
    cache.remove(CacheKey::Reviews(id));
}

pub fn commit_delete_movie(cache: &mut QueryCache, movie: &Movie) {
    let Some(id) = movie.id.server() else {
        return;
    };
    commit_parent(cache, id, None);
    cache.remove(CacheKey::Reviews(id));
}

/// Recomputes the parent movie's average from the speculative review list so
/// the detail and list views agree with it while the write is in flight.
fn speculate_average(cache: &mut QueryCache, movie_id: i32) {
    let Some(reviews) = cache.reviews(movie_id) else {
        return;
    };
    let avg = average_rating(reviews);
    let target = RecordId::Server(movie_id);

    cache.speculate(CacheKey::Movie(movie_id), |data| {
        if let CacheData::Movie(movie) = data {
            movie.average_rating = avg;
        }
    });
    cache.speculate(CacheKey::MovieList, |data| {
        if let CacheData::Movies(movies) = data {
            movies.iter_mut().filter(|m| m.id == target).for_each(|m| m.average_rating = avg);
        }
    });
}

/// Writes the server's view of movie `id` into the detail and list keys.
/// `None` means the movie is gone. Fetches in flight for any key of the movie
/// predate the write and are outdated.
fn commit_parent(cache: &mut QueryCache, id: i32, movie: Option<&Movie>) {
    let target = RecordId::Server(id);
    cache.outdate_fetches(&movie_keys(id));

    match movie {
        Some(movie) => {
            if cache.get(CacheKey::Movie(id)).is_some() {
                cache.settle(CacheKey::Movie(id), CacheData::Movie(movie.clone()));
            }
        },
        None => cache.remove(CacheKey::Movie(id)),
    }

    if let Some(movies) = cache.movies() {
        let mut movies = movies.to_vec();
        match movie {
            Some(movie) => {
                movies.iter_mut().filter(|m| m.id == target).for_each(|m| *m = movie.clone());
            },
            None => movies.retain(|m| m.id != target),
        }
        cache.settle(CacheKey::MovieList, CacheData::Movies(movies));
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use jiff::{Timestamp, civil::date};

    use super::*;
    use crate::{cache::EntryState, clock::ManualClock};

    fn cache() -> QueryCache {
        let clock = Arc::new(ManualClock::new(Timestamp::UNIX_EPOCH));
        QueryCache::new(clock, Duration::from_secs(60))
    }

    fn dune(avg: Option<f64>) -> Movie {
        Movie {
            id: RecordId::Server(1),
            name: "Dune".to_string(),
            release_date: date(2021, 10, 22),
            average_rating: avg,
        }
    }

    fn review(id: RecordId, rating: f64) -> Review {
        Review { id, movie_id: 1, reviewer_name: None, rating, review_comments: String::new() }
    }

    fn seeded() -> QueryCache {
        let mut cache = cache();
        cache.settle(CacheKey::MovieList, CacheData::Movies(vec![dune(Some(7.0))]));
        cache.settle(CacheKey::Movie(1), CacheData::Movie(dune(Some(7.0))));
        cache.settle(
            CacheKey::Reviews(1),
            CacheData::Reviews(vec![review(1.into(), 8.0), review(2.into(), 6.0)]),
        );
        cache
    }

    #[test]
    fn add_review_commit_swaps_provisional_id() {
        let mut cache = seeded();
        let temp = RecordId::provisional(1);

        apply_add_review(&mut cache, review(temp.clone(), 10.0));
        assert_eq!(cache.state(CacheKey::Reviews(1)), EntryState::OptimisticPending);
        assert_eq!(cache.reviews(1).unwrap().len(), 3);
        assert_eq!(cache.movie(1).unwrap().average_rating, Some(8.0));
        assert_eq!(cache.movies().unwrap()[0].average_rating, Some(8.0));

        let confirmed =
            ReviewEnvelope { review: review(3.into(), 10.0), movie: Some(dune(Some(8.0))) };
        commit_add_review(&mut cache, &temp, &confirmed);

        let reviews = cache.reviews(1).unwrap();
        assert_eq!(reviews.len(), 3);
        assert!(reviews.iter().all(|r| !r.id.is_provisional()));
        assert_eq!(reviews[2].id, RecordId::Server(3));
        assert_eq!(cache.resolve(&temp), Some(3));
        for key in movie_keys(1) {
            assert_eq!(cache.state(key), EntryState::Fresh, "{key:?}");
        }
    }

    #[test]
    fn commit_does_not_duplicate_an_already_listed_review() {
        let mut cache = seeded();
        let temp = RecordId::provisional(9);
        apply_add_review(&mut cache, review(temp.clone(), 10.0));

        // a refetch raced in the confirmed record before the commit
        if let Some(CacheData::Reviews(reviews)) = cache.pending_mut(CacheKey::Reviews(1)) {
            reviews.push(review(3.into(), 10.0));
        }

        let confirmed =
            ReviewEnvelope { review: review(3.into(), 10.0), movie: Some(dune(Some(8.0))) };
        commit_add_review(&mut cache, &temp, &confirmed);

        let ids: Vec<_> = cache.reviews(1).unwrap().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![RecordId::Server(1), RecordId::Server(2), RecordId::Server(3)]);
    }

    #[test]
    fn revert_restores_exact_pre_write_state() {
        let mut cache = seeded();
        let before = cache.reviews(1).unwrap().to_vec();
        let snap = snapshot(&cache, &movie_keys(1));

        apply_add_review(&mut cache, review(RecordId::provisional(1), 10.0));
        revert(&mut cache, snap);

        assert_eq!(cache.reviews(1).unwrap(), before.as_slice());
        assert_eq!(cache.movie(1).unwrap().average_rating, Some(7.0));
        assert_eq!(cache.state(CacheKey::Reviews(1)), EntryState::Stale);
        assert_eq!(cache.state(CacheKey::Movie(1)), EntryState::Stale);
    }

    #[test]
    fn first_fetch_in_flight_during_commit_lands_stale() {
        let mut cache = cache();
        let ticket = cache.begin_fetch(CacheKey::Reviews(1));

        let temp = RecordId::provisional(1);
        apply_add_review(&mut cache, review(temp.clone(), 10.0));
        let confirmed =
            ReviewEnvelope { review: review(3.into(), 10.0), movie: Some(dune(Some(8.0))) };
        commit_add_review(&mut cache, &temp, &confirmed);

        let before_write = vec![review(1.into(), 8.0), review(2.into(), 6.0)];
        cache.complete_fetch(ticket, CacheData::Reviews(before_write));
        assert_eq!(cache.state(CacheKey::Reviews(1)), EntryState::Stale);
    }

    #[test]
    fn fetch_in_flight_during_revert_does_not_overwrite_snapshot() {
        let mut cache = seeded();
        cache.invalidate(CacheKey::Reviews(1));
        let ticket = cache.begin_fetch(CacheKey::Reviews(1));
        let snap = snapshot(&cache, &movie_keys(1));

        apply_add_review(&mut cache, review(RecordId::provisional(1), 10.0));
        revert(&mut cache, snap);

        cache.complete_fetch(ticket, CacheData::Reviews(Vec::new()));
        assert_eq!(cache.reviews(1).unwrap().len(), 2);
        assert_eq!(cache.state(CacheKey::Reviews(1)), EntryState::Stale);
    }

    #[test]
    fn deleting_last_review_speculates_null_average() {
        let mut cache = cache();
        cache.settle(CacheKey::Movie(1), CacheData::Movie(dune(Some(5.0))));
        cache.settle(CacheKey::Reviews(1), CacheData::Reviews(vec![review(4.into(), 5.0)]));

        apply_delete_review(&mut cache, 1, 4);
        assert_eq!(cache.reviews(1).unwrap().len(), 0);
        assert_eq!(cache.movie(1).unwrap().average_rating, None);
    }

    #[test]
    fn update_review_patches_fields_and_average() {
        let mut cache = seeded();
        let update = ReviewUpdate {
            reviewer_name: Some("leto".to_string()),
            rating: 2.0,
            review_comments: None,
        };
        apply_update_review(&mut cache, 1, 1, &update);

        let first = &cache.reviews(1).unwrap()[0];
        assert_eq!(first.rating, 2.0);
        assert_eq!(first.reviewer_name.as_deref(), Some("leto"));
        assert_eq!(cache.movie(1).unwrap().average_rating, Some(4.0));
    }

    #[test]
    fn uncached_keys_are_not_created() {
        let mut cache = cache();
        apply_add_review(&mut cache, review(RecordId::provisional(1), 3.0));
        assert_eq!(cache.state(CacheKey::Reviews(1)), EntryState::Empty);
        assert_eq!(cache.state(CacheKey::Movie(1)), EntryState::Empty);
    }

    #[test]
    fn delete_movie_commit_drops_dependents() {
        let mut cache = seeded();
        let snap = snapshot(&cache, &movie_keys(1));
        apply_delete_movie(&mut cache, 1);
        assert!(cache.movies().unwrap().is_empty());
        assert_eq!(cache.state(CacheKey::Reviews(1)), EntryState::Empty);

        revert(&mut cache, snap.clone());
        assert_eq!(cache.movies().unwrap().len(), 1);
        assert_eq!(cache.reviews(1).unwrap().len(), 2);

        apply_delete_movie(&mut cache, 1);
        commit_delete_movie(&mut cache, &dune(Some(7.0)));
        assert!(cache.movies().unwrap().is_empty());
        assert_eq!(cache.state(CacheKey::MovieList), EntryState::Fresh);
        assert_eq!(cache.state(CacheKey::Movie(1)), EntryState::Empty);
    }

    #[test]
    fn add_movie_commit_seeds_detail_key() {
        let mut cache = cache();
        cache.settle(CacheKey::MovieList, CacheData::Movies(Vec::new()));
        let temp = RecordId::provisional(2);
        let mut provisional = dune(None);
        provisional.id = temp.clone();

        apply_add_movie(&mut cache, provisional);
        assert_eq!(cache.movies().unwrap()[0].id, temp);

        commit_add_movie(&mut cache, &temp, &dune(None));
        assert_eq!(cache.movies().unwrap()[0].id, RecordId::Server(1));
        assert_eq!(cache.state(CacheKey::Movie(1)), EntryState::Fresh);
    }
}
