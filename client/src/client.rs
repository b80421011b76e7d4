use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::sync::{Mutex as KeyLock, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::{
    api::Api,
    cache::{CacheData, CacheKey, EntryState, QueryCache},
    clock::Clock,
    config::ClientConfig,
    error::{ClientError, ClientResult},
    models::{
        Movie, MovieUpdate, NewMovie, NewReview, RecordId, Review, ReviewEnvelope, ReviewUpdate,
    },
    reconcile,
};

/// Reads through the cache and performs optimistic writes.
///
/// Writes touching the same cache key run one at a time: a second write waits
/// until the first has been committed or reverted.
pub struct MovieClient<A> {
    api: A,
    cache: Mutex<QueryCache>,
    key_locks: Mutex<HashMap<CacheKey, Arc<KeyLock<()>>>>,
    timeout: Duration,
    next_provisional: AtomicU64,
}

impl<A: Api> MovieClient<A> {
    pub fn new(api: A, clock: Arc<dyn Clock>, config: &ClientConfig) -> Self {
        Self {
            api,
            cache: Mutex::new(QueryCache::new(clock, config.fresh_for)),
            key_locks: Mutex::new(HashMap::new()),
            timeout: config.timeout,
            next_provisional: AtomicU64::new(1),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Runs `f` against the current cache contents.
    pub fn with_cache<R>(&self, f: impl FnOnce(&QueryCache) -> R) -> R {
        f(&*self.cache())
    }

    pub fn state(&self, key: CacheKey) -> EntryState {
        self.cache().state(key)
    }

    pub fn invalidate(&self, key: CacheKey) {
        self.cache().invalidate(key);
    }

    pub async fn movies(&self) -> ClientResult<Vec<Movie>> {
        self.query(CacheKey::MovieList, || self.api.list_movies(), CacheData::Movies, |d| {
            d.as_movies().map(<[Movie]>::to_vec)
        })
        .await
    }

    pub async fn movie(&self, id: i32) -> ClientResult<Movie> {
        self.query(CacheKey::Movie(id), || self.api.get_movie(id), CacheData::Movie, |d| {
            d.as_movie().cloned()
        })
        .await
    }

    pub async fn reviews(&self, movie_id: i32) -> ClientResult<Vec<Review>> {
        self.query(
            CacheKey::Reviews(movie_id),
            || self.api.list_reviews(movie_id),
            CacheData::Reviews,
            |d| d.as_reviews().map(<[Review]>::to_vec),
        )
        .await
    }

    pub async fn add_review(&self, new: NewReview) -> ClientResult<ReviewEnvelope> {
        let provisional = self.provisional_id();
        let review = Review {
            id: provisional.clone(),
            movie_id: new.movie_id,
            reviewer_name: new.reviewer_name.clone(),
            rating: new.rating,
            review_comments: new.review_comments.clone(),
        };

        self.mutate(
            &reconcile::movie_keys(new.movie_id),
            |cache| reconcile::apply_add_review(cache, review),
            || self.api.create_review(&new),
            |cache, out| reconcile::commit_add_review(cache, &provisional, out),
        )
        .await
    }

    /// Edits a review. `id` may be the provisional id of a review whose
    /// creation is still in flight; the edit then waits for it to resolve.
    pub async fn edit_review(
        &self,
        movie_id: i32,
        id: &RecordId,
        update: ReviewUpdate,
    ) -> ClientResult<ReviewEnvelope> {
        let keys = reconcile::movie_keys(movie_id);
        let _guards = self.lock_keys(&keys).await;
        let id = self.resolve(id)?;

        self.run_optimistic(
            &keys,
            |cache| reconcile::apply_update_review(cache, movie_id, id, &update),
            || self.api.update_review(id, &update),
            reconcile::commit_update_review,
        )
        .await
    }

    pub async fn delete_review(&self, movie_id: i32, id: &RecordId) -> ClientResult<ReviewEnvelope> {
        let keys = reconcile::movie_keys(movie_id);
        let _guards = self.lock_keys(&keys).await;
        let id = self.resolve(id)?;

        self.run_optimistic(
            &keys,
            |cache| reconcile::apply_delete_review(cache, movie_id, id),
            || self.api.delete_review(id),
            reconcile::commit_delete_review,
        )
        .await
    }

    pub async fn add_movie(&self, new: NewMovie) -> ClientResult<Movie> {
        let provisional = self.provisional_id();
        let movie = Movie {
            id: provisional.clone(),
            name: new.name.clone(),
            release_date: new.release_date,
            average_rating: new.average_rating,
        };

        self.mutate(
            &[CacheKey::MovieList],
            |cache| reconcile::apply_add_movie(cache, movie),
            || self.api.create_movie(&new),
            |cache, out| reconcile::commit_add_movie(cache, &provisional, out),
        )
        .await
    }

    pub async fn edit_movie(&self, id: &RecordId, update: MovieUpdate) -> ClientResult<Movie> {
        let id = self.resolve_waiting(id).await?;
        let keys = reconcile::movie_keys(id);
        let _guards = self.lock_keys(&keys).await;

        self.run_optimistic(
            &keys,
            |cache| reconcile::apply_update_movie(cache, id, &update),
            || self.api.update_movie(id, &update),
            reconcile::commit_update_movie,
        )
        .await
    }

    pub async fn delete_movie(&self, id: &RecordId) -> ClientResult<Movie> {
        let id = self.resolve_waiting(id).await?;
        let keys = reconcile::movie_keys(id);
        let _guards = self.lock_keys(&keys).await;

        self.run_optimistic(
            &keys,
            |cache| reconcile::apply_delete_movie(cache, id),
            || self.api.delete_movie(id),
            reconcile::commit_delete_movie,
        )
        .await
    }

    async fn query<T, F, Fut>(
        &self,
        key: CacheKey,
        fetch: F,
        wrap: fn(T) -> CacheData,
        read: fn(&CacheData) -> Option<T>,
    ) -> ClientResult<T>
    where
        T: Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let ticket = {
            let mut cache = self.cache();
            if matches!(cache.state(key), EntryState::Fresh | EntryState::OptimisticPending) {
                if let Some(hit) = cache.get(key).and_then(read) {
                    return Ok(hit);
                }
            }
            cache.begin_fetch(key)
        };

        match self.with_timeout(fetch()).await {
            Ok(value) => {
                self.cache().complete_fetch(ticket, wrap(value.clone()));
                Ok(value)
            },
            Err(err) => {
                self.cache().fail_fetch(key);
                Err(err)
            },
        }
    }

    async fn mutate<T, F, Fut>(
        &self,
        keys: &[CacheKey],
        apply: impl FnOnce(&mut QueryCache),
        call: F,
        commit: impl FnOnce(&mut QueryCache, &T),
    ) -> ClientResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let _guards = self.lock_keys(keys).await;
        self.run_optimistic(keys, apply, call, commit).await
    }

    /// Snapshot, speculative apply, then commit or revert. Callers hold the
    /// key locks for `keys`.
    async fn run_optimistic<T, F, Fut>(
        &self,
        keys: &[CacheKey],
        apply: impl FnOnce(&mut QueryCache),
        call: F,
        commit: impl FnOnce(&mut QueryCache, &T),
    ) -> ClientResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        let snapshot = {
            let mut cache = self.cache();
            let snapshot = reconcile::snapshot(&cache, keys);
            apply(&mut *cache);
            snapshot
        };

        match self.with_timeout(call()).await {
            Ok(out) => {
                commit(&mut *self.cache(), &out);
                Ok(out)
            },
            Err(err) => {
                warn!(error = %err, "write failed");
                reconcile::revert(&mut *self.cache(), snapshot);
                Err(err)
            },
        }
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = ClientResult<T>>) -> ClientResult<T> {
        tokio::time::timeout(self.timeout, fut).await.unwrap_or(Err(ClientError::Timeout))
    }

    /// Acquires the per-key write locks in key order.
    async fn lock_keys(&self, keys: &[CacheKey]) -> Vec<OwnedMutexGuard<()>> {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();

        let locks: Vec<_> = {
            let mut table = self.key_locks.lock().unwrap_or_else(|e| e.into_inner());
            keys.iter().map(|key| table.entry(*key).or_default().clone()).collect()
        };

        let mut guards = Vec::with_capacity(locks.len());
        for lock in locks {
            guards.push(lock.lock_owned().await);
        }
        guards
    }

    fn resolve(&self, id: &RecordId) -> ClientResult<i32> {
        self.cache()
            .resolve(id)
            .ok_or_else(|| ClientError::NotFound(format!("record {id} was never saved")))
    }

    /// Resolves a movie id, waiting out any in-flight write on the movie
    /// list first so a provisional id has had the chance to be reconciled.
    async fn resolve_waiting(&self, id: &RecordId) -> ClientResult<i32> {
        if id.is_provisional() {
            debug!(id = %id, "waiting for provisional movie to resolve");
            drop(self.lock_keys(&[CacheKey::MovieList]).await);
        }
        self.resolve(id)
    }

    fn provisional_id(&self) -> RecordId {
        RecordId::provisional(self.next_provisional.fetch_add(1, Ordering::Relaxed))
    }

    fn cache(&self) -> MutexGuard<'_, QueryCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}
