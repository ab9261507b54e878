//! Mapping between Wikidot page names and the file stems used in the mirror.
//!
//! Wikidot writes non-default namespaces as `namespace:page`. The `:` is not a valid
//! filename character on every platform, so the first separator becomes `_` locally.
//! The one page whose local form would be a reserved device name (`con`) gets a
//! trailing marker instead.

pub const NAMESPACE_SEPARATOR: char = ':';
pub const LOCAL_SEPARATOR: char = '_';

const RESERVED_NAME: &str = "con";
const RESERVED_MARKER: char = '-';

/// Convert a remote page name (`ns:page`) into its local file stem (`ns_page`).
pub fn to_local(remote: &str) -> String {
    let local = replace_first(remote, NAMESPACE_SEPARATOR, LOCAL_SEPARATOR);
    if local == RESERVED_NAME {
        return format!("{local}{RESERVED_MARKER}");
    }
    local
}

/// Convert a local file stem back into the remote page name.
pub fn to_remote(local: &str) -> String {
    if let Some(stripped) = local.strip_suffix(RESERVED_MARKER)
        && stripped == RESERVED_NAME
    {
        return RESERVED_NAME.to_string();
    }
    replace_first(local, LOCAL_SEPARATOR, NAMESPACE_SEPARATOR)
}

/// Accept a page name in either form and return the local stem.
pub fn normalize_to_local(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.contains(NAMESPACE_SEPARATOR) {
        return to_local(trimmed);
    }
    if trimmed == RESERVED_NAME {
        return to_local(trimmed);
    }
    trimmed.to_string()
}

fn replace_first(value: &str, from: char, to: char) -> String {
    match value.split_once(from) {
        Some((head, tail)) => format!("{head}{to}{tail}"),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{normalize_to_local, to_local, to_remote};

    #[test]
    fn default_namespace_names_are_unchanged() {
        assert_eq!(to_local("start"), "start");
        assert_eq!(to_remote("start"), "start");
    }

    #[test]
    fn only_first_separator_is_rewritten() {
        assert_eq!(to_local("system:page-tags"), "system_page-tags");
        assert_eq!(to_local("a:b:c"), "a_b:c");
        assert_eq!(to_remote("a_b:c"), "a:b:c");
    }

    #[test]
    fn roundtrip_for_names_without_underscores() {
        for name in [
            "start",
            "forum:start",
            "admin:manage",
            "nav:side",
            "search:site",
            "deep:nested:name",
            "console",
            "con-artist",
            "conventions:2024",
        ] {
            assert_eq!(to_remote(&to_local(name)), name, "roundtrip failed for {name}");
        }
    }

    #[test]
    fn reserved_name_gets_marker_and_maps_back() {
        assert_eq!(to_local("con"), "con-");
        assert_eq!(to_remote("con-"), "con");
        assert_ne!(to_local("con"), "con");
    }

    #[test]
    fn reserved_word_namespace_is_not_special() {
        assert_eq!(to_local("con:list"), "con_list");
        assert_eq!(to_remote("con_list"), "con:list");
    }

    #[test]
    fn normalize_accepts_both_forms() {
        assert_eq!(normalize_to_local("forum:start"), "forum_start");
        assert_eq!(normalize_to_local("forum_start"), "forum_start");
        assert_eq!(normalize_to_local("  con  "), "con-");
        assert_eq!(normalize_to_local("con-"), "con-");
    }
}
