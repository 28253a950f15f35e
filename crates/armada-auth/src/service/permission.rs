//! Permission matching
//!
//! Permissions are dotted strings ("cluster.refresh", "node.restart"). A
//! user holds a required permission when the set contains it exactly, the
//! global `*`, or a prefix wildcard like `node.*` covering everything
//! under that prefix. Check results are cached per user and invalidated
//! when the user's grants change.

use std::{collections::BTreeSet, sync::LazyLock, time::Duration};

use moka::sync::Cache;

use crate::model::GLOBAL_PERMISSION;

/// Cache for permission check results
static PERMISSION_CHECK_CACHE: LazyLock<Cache<String, bool>> = LazyLock::new(|| {
    Cache::builder()
        .max_capacity(10_000)
        .time_to_live(Duration::from_secs(300)) // 5 minutes TTL
        .build()
});

/// Uncached wildcard-aware membership check
pub fn has_permission(held: &BTreeSet<String>, required: &str) -> bool {
    if held.contains(GLOBAL_PERMISSION) || held.contains(required) {
        return true;
    }

    held.iter().any(|permission| {
        permission.strip_suffix(".*").is_some_and(|prefix| {
            required
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.'))
        })
    })
}

/// Cached check keyed by `{username}:{permission}`
pub fn check_permission_cached(username: &str, held: &BTreeSet<String>, required: &str) -> bool {
    let cache_key = format!("{}:{}", username, required);
    if let Some(result) = PERMISSION_CHECK_CACHE.get(&cache_key) {
        return result;
    }

    let result = has_permission(held, required);
    PERMISSION_CHECK_CACHE.insert(cache_key, result);
    result
}

/// Invalidate every cached verdict for a user
pub fn invalidate_cache_for_user(username: &str) {
    let prefix = format!("{}:", username);
    let keys_to_invalidate: Vec<String> = PERMISSION_CHECK_CACHE
        .iter()
        .filter_map(|(key, _)| {
            if key.starts_with(&prefix) {
                Some((*key).clone())
            } else {
                None
            }
        })
        .collect();

    for key in keys_to_invalidate {
        PERMISSION_CHECK_CACHE.invalidate(&key);
    }
}
