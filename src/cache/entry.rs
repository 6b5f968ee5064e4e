use time::{Duration, OffsetDateTime};

pub const DEFAULT_TTL_SECONDS: u64 = 86_400;

/// A page stored in the durable tier.
///
/// Entries are never mutated after being written; expiry is decided lazily
/// when the entry is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub body: String,
    pub ttl_seconds: u64,
    pub created_at: OffsetDateTime,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        body: impl Into<String>,
        ttl_seconds: u64,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            key: key.into(),
            body: body.into(),
            ttl_seconds,
            created_at,
        }
    }

    /// `None` when the expiry instant is past the representable range.
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        expiry(self.created_at, self.ttl_seconds)
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at().is_some_and(|expires_at| now >= expires_at)
    }
}

pub(crate) fn expiry(from: OffsetDateTime, ttl_seconds: u64) -> Option<OffsetDateTime> {
    let ttl = i64::try_from(ttl_seconds).ok()?;
    from.checked_add(Duration::seconds(ttl))
}
