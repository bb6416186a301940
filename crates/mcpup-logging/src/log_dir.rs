//! OS-specific log directory resolution.
//!
//! Mirrors the platform conventions a packaged desktop/CLI tool is expected
//! to follow rather than dumping everything into the working directory.

use std::path::PathBuf;

/// Resolves the directory per-server log files live under, creating it with
/// mode `0755` if it does not already exist.
pub fn resolve_log_dir() -> io::Result<PathBuf> {
    let dir = platform_dir();
    std::fs::create_dir_all(&dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&dir)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&dir, perms)?;
    }
    Ok(dir)
}

use std::io;

#[cfg(target_os = "macos")]
fn platform_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join("Library/Logs/mcpproxy")
}

#[cfg(all(unix, not(target_os = "macos")))]
fn platform_dir() -> PathBuf {
    let is_root = unsafe { libc_geteuid() } == 0;
    if is_root {
        return PathBuf::from("/var/log/mcpproxy");
    }
    let state_home = std::env::var("XDG_STATE_HOME").ok().map(PathBuf::from).unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".local/state")
    });
    state_home.join("mcpproxy/logs")
}

#[cfg(all(unix, not(target_os = "macos")))]
fn libc_geteuid() -> u32 {
    // Avoid a libc dependency for a single syscall: read it from /proc on
    // Linux, falling back to "not root" if unavailable (sandboxes, BSDs
    // without procfs).
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status.lines().find_map(|line| {
                line.strip_prefix("Uid:")
                    .and_then(|rest| rest.split_whitespace().next())
                    .and_then(|s| s.parse().ok())
            })
        })
        .unwrap_or(1000)
}

#[cfg(windows)]
fn platform_dir() -> PathBuf {
    if let Ok(local_app_data) = std::env::var("LOCALAPPDATA") {
        return PathBuf::from(local_app_data).join("mcpproxy\\logs");
    }
    if let Ok(user_profile) = std::env::var("USERPROFILE") {
        return PathBuf::from(user_profile).join("AppData\\Local\\mcpproxy\\logs");
    }
    std::env::temp_dir().join("mcpproxy\\logs")
}

/// Builds the per-server log file name, e.g. `server-filesystem.log`.
pub fn server_log_file_name(server_name: &str) -> String {
    format!("server-{server_name}.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_log_file_name_format() {
        assert_eq!(server_log_file_name("filesystem"), "server-filesystem.log");
    }

    #[test]
    fn resolve_log_dir_creates_directory() {
        let dir = resolve_log_dir().expect("log dir should resolve");
        assert!(dir.exists());
    }
}
