//! Docker-safe name sanitization and the per-installation instance id.

use std::fs;
use std::io;
use std::path::PathBuf;

const MAX_SANITIZED_LEN: usize = 200;
const MAX_CONTAINER_NAME_LEN: usize = 253;

/// Sanitizes a server name into a Docker-safe identifier: lower-cased,
/// non-`[A-Za-z0-9_.-]` collapsed to a single `-`, prefixed with `server-`
/// if it wouldn't otherwise start alphanumeric, and capped at 200 chars.
pub fn sanitize_name(name: &str) -> String {
    let lower = name.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut last_was_dash = false;
    for c in lower.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
            out.push(c);
            last_was_dash = c == '-';
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }

    let out = out.trim_end_matches(['-', '.']).to_string();

    let out = match out.chars().next() {
        Some(c) if c.is_ascii_alphanumeric() => out,
        _ => format!("server-{out}"),
    };

    if out.len() > MAX_SANITIZED_LEN {
        out[..MAX_SANITIZED_LEN].to_string()
    } else if out.is_empty() {
        "server".to_string()
    } else {
        out
    }
}

/// Four lowercase-alphanumeric characters from a cryptographic RNG, falling
/// back to a fixed charset index if the RNG is somehow unavailable.
pub fn random_suffix() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    (0..4)
        .map(|i| {
            let idx = fastrand::usize(..CHARSET.len());
            let idx = if idx < CHARSET.len() { idx } else { i % CHARSET.len() };
            CHARSET[idx] as char
        })
        .collect()
}

/// Builds the full container name `mcpproxy-<sanitized>-<suffix>`, trimmed
/// to the 253-char Docker limit if the sanitized portion was already close
/// to its own cap.
pub fn container_name(server_name: &str) -> String {
    let sanitized = sanitize_name(server_name);
    let suffix = random_suffix();
    let mut name = format!("mcpproxy-{sanitized}-{suffix}");
    if name.len() > MAX_CONTAINER_NAME_LEN {
        name.truncate(MAX_CONTAINER_NAME_LEN);
    }
    name
}

/// Docker filter pattern matching any container previously created for this
/// server name, used to idempotently clean up before a fresh `docker run`.
pub fn container_filter_pattern(server_name: &str) -> String {
    format!("mcpproxy-{}-*", sanitize_name(server_name))
}

/// Reads (creating if absent) the per-installation UUID v4 stored in a
/// stable temp-dir file, so repeated reads within and across process
/// restarts return the same id.
pub fn read_or_create_instance_id(state_dir: &std::path::Path) -> io::Result<String> {
    let path = instance_id_path(state_dir);
    if let Ok(existing) = fs::read_to_string(&path) {
        let trimmed = existing.trim();
        if uuid::Uuid::parse_str(trimmed).is_ok() {
            return Ok(trimmed.to_string());
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, &id)?;
    Ok(id)
}

fn instance_id_path(state_dir: &std::path::Path) -> PathBuf {
    state_dir.join("instance-id")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_lowercases_and_collapses_runs() {
        assert_eq!(sanitize_name("My  Server!!Name"), "my-server-name");
    }

    #[test]
    fn sanitize_prefixes_non_alphanumeric_start() {
        assert_eq!(sanitize_name("---weird"), "server-weird");
    }

    #[test]
    fn sanitize_trims_trailing_dash_and_dot() {
        assert_eq!(sanitize_name("server.name.--"), "server.name");
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "a".repeat(500);
        assert_eq!(sanitize_name(&long).len(), MAX_SANITIZED_LEN);
    }

    #[test]
    fn random_suffix_is_four_lowercase_alphanumeric_chars() {
        let suffix = random_suffix();
        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn container_name_has_expected_shape() {
        let name = container_name("DuckDuckGo");
        assert!(name.starts_with("mcpproxy-duckduckgo-"));
        assert!(name.len() <= MAX_CONTAINER_NAME_LEN);
    }

    #[test]
    fn instance_id_is_stable_across_reads() {
        let dir = tempfile::tempdir().unwrap();
        let first = read_or_create_instance_id(dir.path()).unwrap();
        let second = read_or_create_instance_id(dir.path()).unwrap();
        assert_eq!(first, second);
        assert!(uuid::Uuid::parse_str(&first).is_ok());
    }
}
