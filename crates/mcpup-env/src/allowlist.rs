//! Allow-list filtering of the parent environment before it is handed to an
//! upstream child process.

/// Variable names always forwarded regardless of platform.
const ALWAYS_ALLOWED: &[&str] = &[
    "PATH", "HOME", "TMPDIR", "TEMP", "TMP", "SHELL", "TERM", "LANG", "USER", "USERNAME",
];

#[cfg(windows)]
const PLATFORM_ALLOWED: &[&str] = &[
    "USERPROFILE",
    "APPDATA",
    "LOCALAPPDATA",
    "PROGRAMFILES",
    "SYSTEMROOT",
    "COMSPEC",
];

#[cfg(not(windows))]
const PLATFORM_ALLOWED: &[&str] = &[
    "XDG_CONFIG_HOME",
    "XDG_DATA_HOME",
    "XDG_CACHE_HOME",
    "XDG_RUNTIME_DIR",
];

/// Name suffixes that mark a variable as secret-shaped; these are dropped
/// unless the exact name also appears on an allow list.
const SECRET_SUFFIXES: &[&str] = &["KEY", "TOKEN", "SECRET", "PASSWORD"];

/// Returns true if `name` should be forwarded to a child process by default.
///
/// Matches an exact built-in, a platform built-in, any `LC_*` locale
/// variable, or a caller-supplied allow pattern (exact name or `prefix*`
/// wildcard). Names that look like secrets (`*KEY`, `*TOKEN`, `*SECRET`,
/// `*PASSWORD`) are rejected even if they would otherwise match a wildcard,
/// unless they are named exactly in `extra_allow`.
pub fn is_allowed(name: &str, extra_allow: &[String]) -> bool {
    if ALWAYS_ALLOWED.contains(&name) || PLATFORM_ALLOWED.contains(&name) {
        return true;
    }
    if name.starts_with("LC_") {
        return true;
    }

    let exact_match = extra_allow.iter().any(|pattern| pattern == name);
    if exact_match {
        return true;
    }

    let looks_secret = SECRET_SUFFIXES
        .iter()
        .any(|suffix| name.ends_with(suffix) && name.len() > suffix.len());
    if looks_secret {
        return false;
    }

    extra_allow.iter().any(|pattern| {
        pattern
            .strip_suffix('*')
            .is_some_and(|prefix| name.starts_with(prefix))
    })
}

/// Filters `parent_env` down to the allow-listed subset, then layers
/// `custom_env` on top (custom per-server variables are always injected and
/// override anything inherited).
pub fn filter_env<I>(parent_env: I, extra_allow: &[String], custom_env: &[(String, String)]) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut result: Vec<(String, String)> = parent_env
        .into_iter()
        .filter(|(name, _)| is_allowed(name, extra_allow))
        .collect();

    for (key, value) in custom_env {
        if let Some(existing) = result.iter_mut().find(|(k, _)| k == key) {
            existing.1 = value.clone();
        } else {
            result.push((key.clone(), value.clone()));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_ins_always_allowed() {
        assert!(is_allowed("PATH", &[]));
        assert!(is_allowed("HOME", &[]));
        assert!(is_allowed("LC_ALL", &[]));
    }

    #[test]
    fn secret_shaped_names_are_dropped() {
        assert!(!is_allowed("AWS_SECRET_KEY", &[]));
        assert!(!is_allowed("API_TOKEN", &[]));
        assert!(!is_allowed("DB_PASSWORD", &[]));
    }

    #[test]
    fn exact_allow_overrides_secret_suffix() {
        let allow = vec!["MY_API_KEY".to_string()];
        assert!(is_allowed("MY_API_KEY", &allow));
    }

    #[test]
    fn wildcard_prefix_matches() {
        let allow = vec!["FOO_*".to_string()];
        assert!(is_allowed("FOO_BAR", &allow));
        assert!(!is_allowed("BAR_FOO", &allow));
    }

    #[test]
    fn custom_env_always_overrides() {
        let parent = vec![("PATH".to_string(), "/usr/bin".to_string())];
        let custom = vec![("PATH".to_string(), "/custom/bin".to_string())];
        let merged = filter_env(parent, &[], &custom);
        assert_eq!(merged, vec![("PATH".to_string(), "/custom/bin".to_string())]);
    }

    #[test]
    fn unlisted_name_dropped() {
        let parent = vec![("RANDOM_VAR".to_string(), "x".to_string())];
        let merged = filter_env(parent, &[], &[]);
        assert!(merged.is_empty());
    }
}
