#[cfg(test)]
use mock_instant::thread_local::Instant;
#[cfg(not(test))]
use std::time::Instant;

use std::time::Duration;

use bytes::Bytes;
use fnv::FnvHashMap;
use linked_hash_map::LinkedHashMap;

use crate::client::{LeaseGetReply, LeaseToken, StoreResult, HOT_MISS_TOKEN};

/// Provides a size constrained LRU cache which supports memcache-like leases.
///
/// As long as there is no shortage in storage, the cache behaves like a **Map**. Once either the
/// max number of entries is reached or the allocated memory is above the given limit, the least
/// recently used entries are evicted.
///
/// Each entry carries its own TTL (time to live) given in seconds when storing it. A TTL of **0**
/// means that the entry never expires (but can still be evicted).
///
/// Next to the plain **get** and **set**, the cache supports **lease_get** and **lease_set**.
/// If **lease_get** observes a miss, the caller receives a fresh [LeaseToken] and is expected to
/// compute the value and to provide it via **lease_set**. Until this happens (or until the lease
/// expires), all other callers of **lease_get** receive [LeaseToken::HOT_MISS] and are expected to
/// retry later.
///
/// # Examples
/// ```
/// # use lookaside::memory::LeaseCache;
/// # use lookaside::client::{LeaseGetReply, LeaseToken, StoreResult};
/// # use std::time::Duration;
/// # use bytes::Bytes;
/// // Specifies a cache which can store up to 128 entries which can allocate up to 1024 bytes.
/// // Leases expire after 2s.
/// let mut cache = LeaseCache::new(128, 1024, Duration::from_secs(2));
///
/// // The first requester obtains the lease...
/// let token = match cache.lease_get("Foo") {
///     LeaseGetReply::Miss(token) if token.is_owned() => token,
///     _ => panic!("Expected to own the lease"),
/// };
///
/// // ..everyone else is told to come back later...
/// assert_eq!(cache.lease_get("Foo"), LeaseGetReply::Miss(LeaseToken::HOT_MISS));
///
/// // ..until the value has been provided.
/// let value = Bytes::from_static(b"Bar");
/// assert_eq!(cache.lease_set("Foo", value.clone(), 60, token), StoreResult::Stored);
/// assert_eq!(cache.lease_get("Foo"), LeaseGetReply::Hit(value));
/// ```
pub struct LeaseCache {
    num_entries: usize,
    capacity: usize,
    allocated_memory: usize,
    max_memory: usize,
    lease_ttl: Duration,
    next_token: i64,
    reads: usize,
    hits: usize,
    writes: usize,
    map: LinkedHashMap<String, Entry>,
    leases: FnvHashMap<String, Lease>,
}

struct Entry {
    mem_size: usize,
    expires: Option<Instant>,
    value: Bytes,
}

struct Lease {
    token: LeaseToken,
    expires: Instant,
}

impl LeaseCache {
    /// Creates a new cache which can store up to **capacity** entries or as many until they
    /// allocated **max_memory** bytes.
    ///
    /// Leases which are handed out by **lease_get** are valid for **lease_ttl**.
    pub fn new(capacity: usize, max_memory: usize, lease_ttl: Duration) -> Self {
        LeaseCache {
            num_entries: 0,
            capacity,
            allocated_memory: 0,
            max_memory,
            lease_ttl,
            next_token: HOT_MISS_TOKEN + 1,
            reads: 0,
            hits: 0,
            writes: 0,
            map: LinkedHashMap::with_capacity(capacity),
            leases: FnvHashMap::default(),
        }
    }

    /// Stores the given value for the given key.
    ///
    /// Any lease held for the key is dropped, as the entry is now present. Entries which are
    /// larger than the whole cache are rejected.
    pub fn set(&mut self, key: &str, value: Bytes, ttl_seconds: u32) -> StoreResult {
        let _ = self.leases.remove(key);
        self.put(key, value, ttl_seconds)
    }

    /// Stores the given value if the given token matches the lease held for the key.
    ///
    /// On success, the lease is released. If the lease has been replaced in the meantime (or
    /// the entry was stored via **set**), the value is rejected.
    pub fn lease_set(
        &mut self,
        key: &str,
        value: Bytes,
        ttl_seconds: u32,
        token: LeaseToken,
    ) -> StoreResult {
        match self.leases.get(key) {
            Some(lease) if lease.token == token => {
                let _ = self.leases.remove(key);
                self.put(key, value, ttl_seconds)
            }
            _ => StoreResult::NotStored,
        }
    }

    fn put(&mut self, key: &str, value: Bytes, ttl_seconds: u32) -> StoreResult {
        let entry = Entry {
            mem_size: key.len() + value.len(),
            expires: match ttl_seconds {
                0 => None,
                ttl => Some(Instant::now() + Duration::from_secs(ttl as u64)),
            },
            value,
        };

        if entry.mem_size > self.max_memory {
            log::debug!(
                "Not going to store {} as it is larger than the whole cache.",
                key
            );
            return StoreResult::NotStored;
        }

        let mut delta_mem = entry.mem_size as isize;
        let mut delta_count = 1;

        if let Some(previous_entry) = self.map.insert(key.to_owned(), entry) {
            delta_mem -= previous_entry.mem_size as isize;
            delta_count = 0;
        }

        self.writes += 1;
        self.num_entries += delta_count;
        self.allocated_memory = (self.allocated_memory as isize + delta_mem) as usize;

        self.enforce_constraints();

        StoreResult::Stored
    }

    fn enforce_constraints(&mut self) {
        while self.num_entries > self.capacity || self.allocated_memory > self.max_memory {
            match self.map.pop_front() {
                Some((_, entry)) => {
                    self.num_entries -= 1;
                    self.allocated_memory -= entry.mem_size;
                }
                None => break,
            }
        }
    }

    /// Returns the value stored for the given key or **None** if no (live) value is present.
    pub fn get(&mut self, key: &str) -> Option<Bytes> {
        self.reads += 1;

        let now = Instant::now();
        let expired = match self.map.get_refresh(key) {
            Some(entry) if entry.expires.map(|expires| expires > now).unwrap_or(true) => {
                self.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.drop_entry(key);
        }

        None
    }

    /// Returns the value stored for the given key or hands out a lease on a miss.
    ///
    /// If a live lease for the key exists, [LeaseToken::HOT_MISS] is returned. Otherwise a new
    /// token is generated which is neither [LeaseToken::NONE] nor [LeaseToken::HOT_MISS].
    ///
    /// At most **capacity** leases are tracked. Once all of them are live, a plain miss carrying
    /// [LeaseToken::NONE] is returned, so that the caller stores its value without a lease.
    pub fn lease_get(&mut self, key: &str) -> LeaseGetReply {
        if let Some(value) = self.get(key) {
            return LeaseGetReply::Hit(value);
        }

        let now = Instant::now();
        if let Some(lease) = self.leases.get(key) {
            if lease.expires > now {
                return LeaseGetReply::Miss(LeaseToken::HOT_MISS);
            }
        }

        if self.leases.len() >= self.capacity {
            self.leases.retain(|_, lease| lease.expires > now);
            if self.leases.len() >= self.capacity {
                return LeaseGetReply::Miss(LeaseToken::NONE);
            }
        }

        let token = self.next_token();
        let _ = self.leases.insert(
            key.to_owned(),
            Lease {
                token,
                expires: now + self.lease_ttl,
            },
        );

        LeaseGetReply::Miss(token)
    }

    fn next_token(&mut self) -> LeaseToken {
        let token = LeaseToken(self.next_token);
        self.next_token = match self.next_token.checked_add(1) {
            Some(next) => next,
            None => HOT_MISS_TOKEN + 1,
        };

        token
    }

    fn drop_entry(&mut self, key: &str) {
        if let Some(entry) = self.map.remove(key) {
            self.num_entries -= 1;
            self.allocated_memory -= entry.mem_size;
        }
    }

    /// Removes the entry for the given key along with any lease held for it.
    pub fn remove(&mut self, key: &str) {
        self.writes += 1;
        let _ = self.leases.remove(key);
        self.drop_entry(key);
    }

    /// Removes all entries and leases.
    ///
    /// Note that this will also zero all metrics (reads, writes, cache hits).
    pub fn flush(&mut self) {
        self.map.clear();
        self.leases.clear();
        self.allocated_memory = 0;
        self.num_entries = 0;
        self.reads = 0;
        self.writes = 0;
        self.hits = 0;
    }

    /// Returns the number of entries in the cache.
    ///
    /// Note that this might include expired entries which have not been accessed (and therefore
    /// not been dropped) yet.
    pub fn len(&self) -> usize {
        self.num_entries
    }

    /// Determines if the cache is completely empty.
    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    /// Returns the number of leases currently being tracked.
    pub fn num_leases(&self) -> usize {
        self.leases.len()
    }

    /// Returns the maximal number of entries of this cache.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the maximal amount of memory to be (roughly) occupied by this cache.
    pub fn max_memory(&self) -> usize {
        self.max_memory
    }

    /// Returns the amount of memory allocated by the keys and values of this cache in bytes.
    pub fn allocated_memory(&self) -> usize {
        self.allocated_memory
    }

    /// Returns the cache utilization in percent.
    pub fn utilization(&self) -> f32 {
        self.num_entries as f32 / self.capacity as f32 * 100.
    }

    /// Returns the memory utilization in percent.
    pub fn memory_utilization(&self) -> f32 {
        self.allocated_memory as f32 / self.max_memory as f32 * 100.
    }

    /// Returns the cache hit rate in percent.
    ///
    /// Note that all metrics are reset when **flush()** is called.
    pub fn hit_rate(&self) -> f32 {
        match self.reads {
            0 => 0.,
            n => self.hits as f32 / n as f32 * 100.,
        }
    }

    /// Returns the share of writes among all operations in percent.
    pub fn write_read_ratio(&self) -> f32 {
        match self.reads {
            0 => 100.,
            n => self.writes as f32 / (self.writes + n) as f32 * 100.,
        }
    }

    /// Returns the total number of reads performed on this cache since the last flush.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Returns the total number of writes performed on this cache since the last flush.
    pub fn writes(&self) -> usize {
        self.writes
    }
}
