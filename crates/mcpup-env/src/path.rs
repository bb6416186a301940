//! PATH enhancement: making sure a child spawned from a minimal launcher
//! environment (macOS `.app` bundles, Windows services, systemd units
//! without a login shell) can still find interpreters and CLIs installed by
//! the user.

use std::path::Path;

/// Directories commonly populated by package managers and toolchain
/// installers that a minimal launcher PATH tends to miss.
#[cfg(not(windows))]
const UNIX_TOOL_DIRS: &[&str] = &[
    "/usr/local/bin",
    "/opt/homebrew/bin",
    "/opt/homebrew/sbin",
    "/usr/local/sbin",
];

/// Returns true if `path` looks like a minimal, launcher-supplied PATH that
/// is missing the typical Homebrew/local tool directories.
#[cfg(not(windows))]
fn looks_minimal(path: &str) -> bool {
    let entries: Vec<&str> = path.split(':').filter(|s| !s.is_empty()).collect();
    if entries.len() > 2 {
        return false;
    }
    let has_tool_dir = entries
        .iter()
        .any(|e| UNIX_TOOL_DIRS.contains(e));
    !has_tool_dir
}

/// Enhances a Unix PATH by merging existing-on-disk tool directories in
/// front of it, provided the inherited PATH looks minimal (or `force` is
/// set, matching the unconditional Windows behavior).
#[cfg(not(windows))]
pub fn enhance_unix_path(inherited: &str, force: bool) -> String {
    if !force && !looks_minimal(inherited) {
        return inherited.to_string();
    }

    let existing: Vec<&str> = UNIX_TOOL_DIRS
        .iter()
        .filter(|dir| Path::new(dir).is_dir())
        .copied()
        .collect();

    if existing.is_empty() {
        return inherited.to_string();
    }

    let mut merged = existing.join(":");
    if !inherited.is_empty() {
        merged.push(':');
        merged.push_str(inherited);
    }
    merged
}

/// Expands `%VAR%`-style references against a lookup function, matching the
/// Windows `REG_EXPAND_SZ` semantics: unresolved references are left intact.
#[cfg(windows)]
pub fn expand_env_refs(raw: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(raw.len());
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < raw.len() {
        if bytes[i] == b'%' {
            if let Some(end) = raw[i + 1..].find('%') {
                let name = &raw[i + 1..i + 1 + end];
                if let Some(value) = lookup(name) {
                    out.push_str(&value);
                    i = i + 1 + end + 1;
                    continue;
                }
            }
        }
        let ch = raw[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Reads and merges the USER and SYSTEM PATH registry values, expanding
/// `%VAR%` references and filtering to directories that exist on disk. User
/// entries take precedence over system entries.
#[cfg(windows)]
pub fn reconstruct_windows_path() -> std::io::Result<String> {
    use winreg::RegKey;
    use winreg::enums::{HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE};

    let lookup = |name: &str| std::env::var(name).ok();

    let hkcu = RegKey::predef(HKEY_CURRENT_USER).open_subkey("Environment").ok();
    let user_path: String = hkcu
        .as_ref()
        .and_then(|k| k.get_raw_value("Path").ok())
        .map(|v| String::from_utf8_lossy(&v.bytes).trim_end_matches('\0').to_string())
        .unwrap_or_default();

    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE)
        .open_subkey("SYSTEM\\CurrentControlSet\\Control\\Session Manager\\Environment")
        .ok();
    let system_path: String = hklm
        .as_ref()
        .and_then(|k| k.get_raw_value("Path").ok())
        .map(|v| String::from_utf8_lossy(&v.bytes).trim_end_matches('\0').to_string())
        .unwrap_or_default();

    let user_expanded = expand_env_refs(&user_path, lookup);
    let system_expanded = expand_env_refs(&system_path, &lookup);

    let mut entries: Vec<String> = Vec::new();
    for part in user_expanded.split(';').chain(system_expanded.split(';')) {
        if part.is_empty() {
            continue;
        }
        if Path::new(part).is_dir() && !entries.iter().any(|e| e == part) {
            entries.push(part.to_string());
        }
    }

    Ok(entries.join(";"))
}

#[cfg(all(test, not(windows)))]
mod unix_tests {
    use super::*;

    #[test]
    fn minimal_path_detected() {
        assert!(looks_minimal("/usr/bin:/bin"));
        assert!(looks_minimal(""));
    }

    #[test]
    fn rich_path_not_minimal() {
        assert!(!looks_minimal("/a:/b:/c:/d"));
    }

    #[test]
    fn path_with_tool_dir_not_minimal() {
        assert!(!looks_minimal("/usr/local/bin:/usr/bin"));
    }

    #[test]
    fn enhance_is_noop_when_not_forced_and_rich() {
        let original = "/a:/b:/c:/d";
        assert_eq!(enhance_unix_path(original, false), original);
    }
}

#[cfg(all(test, windows))]
mod windows_tests {
    use super::*;

    #[test]
    fn expand_resolves_known_var() {
        let result = expand_env_refs("%USERPROFILE%\\bin", |name| {
            (name == "USERPROFILE").then(|| "C:\\Users\\me".to_string())
        });
        assert_eq!(result, "C:\\Users\\me\\bin");
    }

    #[test]
    fn expand_leaves_unknown_var_intact() {
        let result = expand_env_refs("%NOPE%\\bin", |_| None);
        assert_eq!(result, "%NOPE%\\bin");
    }
}
