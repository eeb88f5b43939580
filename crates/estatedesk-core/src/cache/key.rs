use std::fmt;

/// Default freshness window for most collections.
pub const DEFAULT_TTL_MINUTES: i64 = 30;

/// Freshness window for counters and queues that change under the user.
pub const VOLATILE_TTL_MINUTES: i64 = 5;

/// One cache slot per domain collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Apartments,
    Tenants,
    Users,
    Tasks,
    Keys,
    KeyHistory,
    PendingTasks,
    UnreviewedCount,
    Interests,
    InterestsForReview,
    Statistics,
    /// Collections added by callers without a variant of their own.
    Custom(String),
}

impl CacheKey {
    /// Every built-in collection.
    pub const ALL: [CacheKey; 11] = [
        CacheKey::Apartments,
        CacheKey::Tenants,
        CacheKey::Users,
        CacheKey::Tasks,
        CacheKey::Keys,
        CacheKey::KeyHistory,
        CacheKey::PendingTasks,
        CacheKey::UnreviewedCount,
        CacheKey::Interests,
        CacheKey::InterestsForReview,
        CacheKey::Statistics,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            CacheKey::Apartments => "apartments",
            CacheKey::Tenants => "tenants",
            CacheKey::Users => "users",
            CacheKey::Tasks => "tasks",
            CacheKey::Keys => "keys",
            CacheKey::KeyHistory => "key_history",
            CacheKey::PendingTasks => "pending_tasks",
            CacheKey::UnreviewedCount => "unreviewed_count",
            CacheKey::Interests => "interests",
            CacheKey::InterestsForReview => "interests_for_review",
            CacheKey::Statistics => "statistics",
            CacheKey::Custom(name) => name,
        }
    }

    /// Parse a stored name back into a key. Unknown names become `Custom`.
    pub fn from_name(name: &str) -> Self {
        CacheKey::ALL
            .iter()
            .find(|k| k.as_str() == name)
            .cloned()
            .unwrap_or_else(|| CacheKey::Custom(name.to_string()))
    }

    /// Pending queues and badge counters go stale much faster than
    /// reference collections.
    pub fn is_volatile(&self) -> bool {
        matches!(self, CacheKey::PendingTasks | CacheKey::UnreviewedCount)
    }

    /// REST path of the collection this key caches.
    pub fn api_path(&self) -> String {
        match self {
            CacheKey::Apartments => "/api/apartments".to_string(),
            CacheKey::Tenants => "/api/tenants".to_string(),
            CacheKey::Users => "/api/users".to_string(),
            CacheKey::Tasks => "/api/tasks".to_string(),
            CacheKey::Keys => "/api/keys".to_string(),
            CacheKey::KeyHistory => "/api/key-history".to_string(),
            CacheKey::PendingTasks => "/api/pending-tasks".to_string(),
            CacheKey::UnreviewedCount => "/api/pending-tasks/unreviewed-count".to_string(),
            CacheKey::Interests => "/api/interests".to_string(),
            CacheKey::InterestsForReview => "/api/interests/for-review".to_string(),
            CacheKey::Statistics => "/api/statistics".to_string(),
            CacheKey::Custom(name) => format!("/api/{}", name.replace('_', "-")),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
