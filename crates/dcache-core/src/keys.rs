//! Physical key layout
//!
//! Every physical key is a colon-joined list of segments that starts with the
//! application tag, e.g. `<tag>:<key>` or `<tag>:auto_type:<type>:<key>`.

pub const KEY_SEPARATOR: char = ':';

/// Segment inserted between the tag and the type name for auto-typed entries
pub const AUTO_TYPE_SEGMENT: &str = "auto_type";

/// Prefix of the scalar entry that represents a held lock
pub const LOCK_PREFIX: &str = "lock";

/// Value stored in a lock entry. Its existence is what matters.
pub const LOCK_SENTINEL: &[u8] = b"1";

/// Join key segments with the separator
pub fn join_key<S: AsRef<str>>(segments: &[S]) -> String {
    let mut key = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(segment.as_ref());
    }
    key
}

/// Physical key holding the lock `name`
pub fn lock_key(name: &str) -> String {
    join_key(&[LOCK_PREFIX, name])
}

/// Strip `<namespace>:` from a physical key, if present
pub fn strip_namespace<'a>(namespace: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(namespace)?.strip_prefix(KEY_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_key() {
        assert_eq!(join_key(&["dcache", "session"]), "dcache:session");
        assert_eq!(
            join_key(&["dcache", AUTO_TYPE_SEGMENT, "app::Plugin", "p1"]),
            "dcache:auto_type:app::Plugin:p1"
        );
        assert_eq!(join_key::<&str>(&[]), "");
    }

    #[test]
    fn test_lock_key() {
        assert_eq!(lock_key("dcache:launch"), "lock:dcache:launch");
    }

    #[test]
    fn test_strip_namespace() {
        assert_eq!(strip_namespace("dcache", "dcache:a:b"), Some("a:b"));
        assert_eq!(strip_namespace("dcache", "other:a"), None);
        assert_eq!(strip_namespace("dcache", "dcachex:a"), None);
    }
}
