use std::{collections::HashMap, sync::Arc, time::Duration};

use jiff::{SignedDuration, Timestamp};
use tracing::debug;

use crate::{
    clock::Clock,
    models::{Movie, RecordId, Review},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheKey {
    MovieList,
    Movie(i32),
    Reviews(i32),
}

#[derive(Clone, Debug, PartialEq)]
pub enum CacheData {
    Movies(Vec<Movie>),
    Movie(Movie),
    Reviews(Vec<Review>),
}

impl CacheData {
    pub fn as_movies(&self) -> Option<&[Movie]> {
        match self {
            CacheData::Movies(movies) => Some(movies),
            _ => None,
        }
    }

    pub fn as_movie(&self) -> Option<&Movie> {
        match self {
            CacheData::Movie(movie) => Some(movie),
            _ => None,
        }
    }

    pub fn as_reviews(&self) -> Option<&[Review]> {
        match self {
            CacheData::Reviews(reviews) => Some(reviews),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    Empty,
    Fetching,
    Fresh,
    Stale,
    OptimisticPending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Fetching,
    Settled,
    Invalidated,
    Pending,
}

#[derive(Clone, Debug)]
struct Entry {
    data: Option<CacheData>,
    fresh_until: Timestamp,
    served_at: Timestamp,
    phase: Phase,
}

/// Handed out by [`QueryCache::begin_fetch`]. Records how many writes had
/// touched the key when the request went out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchTicket {
    key: CacheKey,
    writes: u64,
}

/// Keyed store of server responses.
pub struct QueryCache {
    entries: HashMap<CacheKey, Entry>,
    clock: Arc<dyn Clock>,
    fresh_for: SignedDuration,
    resolved: HashMap<RecordId, i32>,
    writes: HashMap<CacheKey, u64>,
}

impl QueryCache {
    pub fn new(clock: Arc<dyn Clock>, fresh_for: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            clock,
            fresh_for: SignedDuration::try_from(fresh_for).unwrap_or(SignedDuration::MAX),
            resolved: HashMap::new(),
            writes: HashMap::new(),
        }
    }

    pub fn state(&self, key: CacheKey) -> EntryState {
        let Some(entry) = self.entries.get(&key) else {
            return EntryState::Empty;
        };
        match entry.phase {
            Phase::Fetching => EntryState::Fetching,
            Phase::Pending => EntryState::OptimisticPending,
            Phase::Invalidated => EntryState::Stale,
            Phase::Settled if self.clock.now() < entry.fresh_until => EntryState::Fresh,
            Phase::Settled => EntryState::Stale,
        }
    }

    pub fn get(&self, key: CacheKey) -> Option<&CacheData> {
        self.entries.get(&key).and_then(|e| e.data.as_ref())
    }

    /// When the data under `key` was last received from the server.
    pub fn served_at(&self, key: CacheKey) -> Option<Timestamp> {
        self.entries.get(&key).filter(|e| e.data.is_some()).map(|e| e.served_at)
    }

    pub fn movies(&self) -> Option<&[Movie]> {
        self.get(CacheKey::MovieList).and_then(CacheData::as_movies)
    }

    pub fn movie(&self, id: i32) -> Option<&Movie> {
        self.get(CacheKey::Movie(id)).and_then(CacheData::as_movie)
    }

    pub fn reviews(&self, movie_id: i32) -> Option<&[Review]> {
        self.get(CacheKey::Reviews(movie_id)).and_then(CacheData::as_reviews)
    }

    /// Marks `key` as being fetched. Pending optimistic entries are left alone.
    pub fn begin_fetch(&mut self, key: CacheKey) -> FetchTicket {
        let now = self.clock.now();
        let entry = self.entries.entry(key).or_insert(Entry {
            data: None,
            fresh_until: now,
            served_at: now,
            phase: Phase::Fetching,
        });
        if entry.phase != Phase::Pending {
            entry.phase = Phase::Fetching;
        }
        debug!(?key, "fetching");
        FetchTicket { key, writes: self.write_count(key) }
    }

    /// Stores a fetched response.
    ///
    /// A response that lands while an optimistic write is pending on the key
    /// is dropped; the write's outcome decides. A response that was requested
    /// before a write on the key resolved is outdated: it is dropped if the
    /// write left data behind, otherwise kept but served as stale.
    pub fn complete_fetch(&mut self, ticket: FetchTicket, data: CacheData) {
        let key = ticket.key;
        if self.state(key) == EntryState::OptimisticPending {
            debug!(?key, "fetch landed during optimistic write, dropped");
            return;
        }
        if ticket.writes == self.write_count(key) {
            self.settle(key, data);
            return;
        }
        match self.entries.get_mut(&key) {
            Some(entry) if entry.data.is_none() => {
                entry.data = Some(data);
                entry.served_at = self.clock.now();
                entry.phase = Phase::Invalidated;
                debug!(?key, "outdated fetch kept as stale");
            },
            _ => debug!(?key, "outdated fetch dropped"),
        }
    }

    pub fn fail_fetch(&mut self, key: CacheKey) {
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        if entry.phase != Phase::Fetching {
            return;
        }
        if entry.data.is_some() {
            entry.phase = Phase::Invalidated;
        } else {
            self.entries.remove(&key);
        }
    }

    pub fn invalidate(&mut self, key: CacheKey) {
        if let Some(entry) = self.entries.get_mut(&key) {
            if entry.phase == Phase::Settled {
                entry.phase = Phase::Invalidated;
                debug!(?key, "invalidated");
            }
        }
    }

    pub fn remove(&mut self, key: CacheKey) {
        self.entries.remove(&key);
    }

    /// Server id a provisional id was reconciled to, or the id itself if it
    /// already is a server id.
    pub fn resolve(&self, id: &RecordId) -> Option<i32> {
        match id {
            RecordId::Server(id) => Some(*id),
            RecordId::Provisional(_) => self.resolved.get(id).copied(),
        }
    }

    fn write_count(&self, key: CacheKey) -> u64 {
        self.writes.get(&key).copied().unwrap_or(0)
    }

    /// Records that a write on `keys` has resolved, so fetches that were
    /// already in flight for them no longer count as fresh.
    pub(crate) fn outdate_fetches(&mut self, keys: &[CacheKey]) {
        for key in keys {
            *self.writes.entry(*key).or_default() += 1;
        }
    }

    pub(crate) fn record_resolution(&mut self, provisional: RecordId, id: i32) {
        self.resolved.insert(provisional, id);
    }

    /// Stores server-confirmed data and starts a new freshness window.
    pub(crate) fn settle(&mut self, key: CacheKey, data: CacheData) {
        let now = self.clock.now();
        let fresh_until = now.checked_add(self.fresh_for).unwrap_or(Timestamp::MAX);
        self.entries.insert(
            key,
            Entry { data: Some(data), fresh_until, served_at: now, phase: Phase::Settled },
        );
        debug!(?key, "fresh");
    }

    /// Applies `patch` to the cached data under `key` and marks the entry
    /// pending. Returns false if there was nothing cached to patch.
    pub(crate) fn speculate(&mut self, key: CacheKey, patch: impl FnOnce(&mut CacheData)) -> bool {
        let Some(entry) = self.entries.get_mut(&key) else {
            return false;
        };
        let Some(data) = entry.data.as_mut() else {
            return false;
        };
        patch(data);
        entry.phase = Phase::Pending;
        debug!(?key, "optimistic write applied");
        true
    }

    /// Mutable access to a pending entry's data, used when reconciling it.
    pub(crate) fn pending_mut(&mut self, key: CacheKey) -> Option<&mut CacheData> {
        self.entries
            .get_mut(&key)
            .filter(|e| e.phase == Phase::Pending)
            .and_then(|e| e.data.as_mut())
    }

    /// Puts back `data` as it was before an optimistic write, marked stale.
    pub(crate) fn restore(&mut self, key: CacheKey, data: Option<CacheData>) {
        match data {
            Some(data) => {
                let now = self.clock.now();
                let served_at = self.entries.get(&key).map(|e| e.served_at).unwrap_or(now);
                self.entries.insert(
                    key,
                    Entry { data: Some(data), fresh_until: now, served_at, phase: Phase::Invalidated },
                );
            },
            None => {
                self.entries.remove(&key);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use jiff::civil::date;

    use super::*;
    use crate::clock::ManualClock;

    fn cache() -> (Arc<ManualClock>, QueryCache) {
        let clock = Arc::new(ManualClock::new(Timestamp::UNIX_EPOCH));
        let cache = QueryCache::new(clock.clone(), Duration::from_secs(30));
        (clock, cache)
    }

    fn dune() -> Movie {
        Movie {
            id: RecordId::Server(1),
            name: "Dune".to_string(),
            release_date: date(2021, 10, 22),
            average_rating: None,
        }
    }

    #[test]
    fn fetch_lifecycle() {
        let (clock, mut cache) = cache();
        let key = CacheKey::Movie(1);
        assert_eq!(cache.state(key), EntryState::Empty);

        let ticket = cache.begin_fetch(key);
        assert_eq!(cache.state(key), EntryState::Fetching);

        cache.complete_fetch(ticket, CacheData::Movie(dune()));
        assert_eq!(cache.state(key), EntryState::Fresh);
        assert_eq!(cache.served_at(key), Some(Timestamp::UNIX_EPOCH));

        clock.advance(SignedDuration::from_secs(29));
        assert_eq!(cache.state(key), EntryState::Fresh);
        clock.advance(SignedDuration::from_secs(1));
        assert_eq!(cache.state(key), EntryState::Stale);
        assert_eq!(cache.movie(1), Some(&dune()));
    }

    #[test]
    fn invalidation_makes_fresh_entries_stale() {
        let (_, mut cache) = cache();
        cache.settle(CacheKey::Movie(1), CacheData::Movie(dune()));
        cache.settle(CacheKey::Reviews(1), CacheData::Reviews(Vec::new()));
        cache.settle(CacheKey::Reviews(2), CacheData::Reviews(Vec::new()));

        cache.invalidate(CacheKey::Movie(1));
        cache.invalidate(CacheKey::Reviews(1));
        assert_eq!(cache.state(CacheKey::Movie(1)), EntryState::Stale);
        assert_eq!(cache.state(CacheKey::Reviews(1)), EntryState::Stale);
        assert_eq!(cache.state(CacheKey::Reviews(2)), EntryState::Fresh);
    }

    #[test]
    fn failed_first_fetch_leaves_no_entry() {
        let (_, mut cache) = cache();
        cache.begin_fetch(CacheKey::MovieList);
        cache.fail_fetch(CacheKey::MovieList);
        assert_eq!(cache.state(CacheKey::MovieList), EntryState::Empty);
    }

    #[test]
    fn fetch_does_not_clobber_pending_write() {
        let (_, mut cache) = cache();
        let key = CacheKey::Movie(1);
        cache.settle(key, CacheData::Movie(dune()));
        let ticket = cache.begin_fetch(key);
        assert!(cache.speculate(key, |data| {
            if let CacheData::Movie(m) = data {
                m.name = "Dune (speculative)".to_string();
            }
        }));

        let mut server = dune();
        server.name = "Dune (server)".to_string();
        cache.complete_fetch(ticket, CacheData::Movie(server));

        assert_eq!(cache.state(key), EntryState::OptimisticPending);
        assert_eq!(cache.movie(1).map(|m| m.name.as_str()), Some("Dune (speculative)"));
    }

    #[test]
    fn speculate_needs_cached_data() {
        let (_, mut cache) = cache();
        assert!(!cache.speculate(CacheKey::Reviews(3), |_| {}));
        assert_eq!(cache.state(CacheKey::Reviews(3)), EntryState::Empty);
    }

    #[test]
    fn fetch_started_before_a_write_resolved_is_not_fresh() {
        let (_, mut cache) = cache();
        let key = CacheKey::Movie(1);

        let ticket = cache.begin_fetch(key);
        cache.outdate_fetches(&[key]);
        cache.complete_fetch(ticket, CacheData::Movie(dune()));
        assert_eq!(cache.state(key), EntryState::Stale);
        assert_eq!(cache.movie(1), Some(&dune()));

        let ticket = cache.begin_fetch(key);
        cache.complete_fetch(ticket, CacheData::Movie(dune()));
        assert_eq!(cache.state(key), EntryState::Fresh);
    }

    #[test]
    fn outdated_fetch_does_not_replace_committed_data() {
        let (_, mut cache) = cache();
        let key = CacheKey::Movie(1);
        cache.settle(key, CacheData::Movie(dune()));

        let ticket = cache.begin_fetch(key);
        let mut renamed = dune();
        renamed.name = "Dune: Part One".to_string();
        cache.settle(key, CacheData::Movie(renamed.clone()));
        cache.outdate_fetches(&[key]);

        cache.complete_fetch(ticket, CacheData::Movie(dune()));
        assert_eq!(cache.state(key), EntryState::Fresh);
        assert_eq!(cache.movie(1), Some(&renamed));
    }
}
