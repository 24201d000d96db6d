//! Glob to LIKE translation
//!
//! Scan patterns arrive in redis glob syntax. `*` becomes `%`, `?` becomes
//! `_`, and literal `%`, `_` and `\` are escaped with `\` (queries use
//! `ESCAPE '\'`). Connections run with `case_sensitive_like` so matching is
//! case sensitive like the native store.

pub fn glob_to_like(pattern: &str) -> String {
    if pattern.is_empty() {
        return "%".to_string();
    }

    let mut out = String::with_capacity(pattern.len() + 4);
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' | '_' => {
                out.push('\\');
                out.push(c);
            }
            '\\' => match chars.next() {
                // `\x` in a glob is a literal x
                Some(escaped @ ('%' | '_' | '\\')) => {
                    out.push('\\');
                    out.push(escaped);
                }
                Some(escaped) => out.push(escaped),
                None => out.push_str("\\\\"),
            },
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcards() {
        assert_eq!(glob_to_like("map_field*"), "map\\_field%");
        assert_eq!(glob_to_like("session*"), "session%");
        assert_eq!(glob_to_like("a?c"), "a_c");
        assert_eq!(glob_to_like("*"), "%");
        assert_eq!(glob_to_like(""), "%");
    }

    #[test]
    fn test_literals_escaped() {
        assert_eq!(glob_to_like("100%_done*"), "100\\%\\_done%");
        assert_eq!(glob_to_like("a\\*b"), "a*b");
        assert_eq!(glob_to_like("a\\_b"), "a\\_b");
        assert_eq!(glob_to_like("tail\\"), "tail\\\\");
    }
}
