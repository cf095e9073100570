//! Keyspace resolution.
//!
//! A resolved store key is `{namespace}:{table}:{user_key}`, with the
//! namespace segment omitted when empty and the user-key segment omitted when
//! absent. No escaping is performed: callers must not embed `:` in table
//! names or user keys when uniqueness matters.

/// Derives the fully-qualified store key for a table-scoped user key.
///
/// Deterministic: every handle sharing `(namespace, table)` resolves the same
/// user key to the same store key, which is what keeps data and locks
/// consistent when handles are recreated.
pub fn resolve_key(namespace: Option<&str>, table: &str, user_key: Option<&str>) -> String {
    let mut key = String::with_capacity(
        namespace.map_or(0, |ns| ns.len() + 1)
            + table.len()
            + user_key.map_or(0, |k| k.len() + 1),
    );
    if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
        key.push_str(ns);
        key.push(':');
    }
    key.push_str(table);
    if let Some(user_key) = user_key {
        key.push(':');
        key.push_str(user_key);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_only() {
        assert_eq!(resolve_key(None, "orders", None), "orders");
    }

    #[test]
    fn table_and_key() {
        assert_eq!(resolve_key(None, "orders", Some("42")), "orders:42");
    }

    #[test]
    fn namespaced() {
        assert_eq!(resolve_key(Some("shop"), "orders", Some("42")), "shop:orders:42");
        assert_eq!(resolve_key(Some("shop"), "orders", None), "shop:orders");
    }

    #[test]
    fn empty_namespace_is_omitted() {
        assert_eq!(resolve_key(Some(""), "orders", Some("42")), "orders:42");
    }

    #[test]
    fn stable_across_calls() {
        let first = resolve_key(Some("shop"), "orders", Some("42"));
        let second = resolve_key(Some("shop"), "orders", Some("42"));
        assert_eq!(first, second);
    }
}
