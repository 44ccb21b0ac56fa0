//! Describes the capability used to talk to the cache tier.
//!
//! A [CacheClient] provides plain **get** and **set** operations as well as their lease aware
//! counterparts **lease_get** and **lease_set**. Leases are the mechanism used to protect the
//! origin against a stampede of requests for a missing key: the first requester who observes the
//! miss receives a [LeaseToken] and is thereby responsible to re-populate the entry. Everyone else
//! observes a **hot miss** until the lease is either released by **lease_set** or expires.
//!
//! Note that all operations report transport problems as [CacheError]. These are informational
//! only: users of the client are expected to treat them like a miss.
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};

use async_trait::async_trait;
use bytes::Bytes;

/// Contains the token value which the cache tier hands out to signal a **hot miss**.
///
/// This value is defined by the lease protocol of the cache tier. Changing it breaks the
/// compatibility with every cache server in use.
pub const HOT_MISS_TOKEN: i64 = 1;

/// Represents a lease token handed out by the cache tier on a miss.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct LeaseToken(pub i64);

impl LeaseToken {
    /// Represents "no token" (a plain miss or leases being disabled).
    pub const NONE: LeaseToken = LeaseToken(0);

    /// Represents a miss while someone else holds the lease for the key.
    pub const HOT_MISS: LeaseToken = LeaseToken(HOT_MISS_TOKEN);

    /// Determines if this is the empty token.
    pub fn is_none(self) -> bool {
        self == LeaseToken::NONE
    }

    /// Determines if this token signals a hot miss.
    pub fn is_hot_miss(self) -> bool {
        self == LeaseToken::HOT_MISS
    }

    /// Determines if the holder of this token owns the lease for its key.
    pub fn is_owned(self) -> bool {
        !self.is_none() && !self.is_hot_miss()
    }
}

impl Display for LeaseToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents the reply of a **lease_get**.
#[derive(Clone, Debug, PartialEq)]
pub enum LeaseGetReply {
    /// The entry was present.
    Hit(Bytes),

    /// The entry was missing. The token is either [LeaseToken::NONE], [LeaseToken::HOT_MISS]
    /// or a token owned by the caller.
    Miss(LeaseToken),
}

/// Represents the outcome of a store operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StoreResult {
    /// The value was stored.
    Stored,

    /// The value was rejected, e.g. as the given lease token was no longer valid.
    NotStored,
}

/// Enumerates the errors reported by a [CacheClient].
pub enum CacheError {
    /// The cache tier (or the client itself) is no longer available.
    Unavailable,

    /// The round-trip to the cache tier failed.
    Transport(anyhow::Error),
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Unavailable => write!(f, "The cache tier is unavailable"),
            CacheError::Transport(error) => write!(f, "Cache transport error: {}", error),
        }
    }
}

impl Debug for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Error for CacheError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CacheError::Unavailable => None,
            CacheError::Transport(error) => Some(error.as_ref()),
        }
    }
}

impl From<anyhow::Error> for CacheError {
    fn from(error: anyhow::Error) -> Self {
        CacheError::Transport(error)
    }
}

/// Provides access to a cache tier.
///
/// Implementations are shared by all route stages using the same flavor, therefore they have
/// to be safe to be used concurrently.
#[async_trait]
pub trait CacheClient: Send + Sync {
    /// Fetches the value stored for the given key.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Fetches the value stored for the given key or obtains a lease on a miss.
    async fn lease_get(&self, key: &str) -> Result<LeaseGetReply, CacheError>;

    /// Stores the given value for **ttl_seconds**.
    async fn set(&self, key: &str, value: Bytes, ttl_seconds: u32)
        -> Result<StoreResult, CacheError>;

    /// Stores the given value if the given lease token is still valid and releases the lease.
    async fn lease_set(
        &self,
        key: &str,
        value: Bytes,
        ttl_seconds: u32,
        token: LeaseToken,
    ) -> Result<StoreResult, CacheError>;
}
