//! Isolation policy: decides whether a stdio server's command should be
//! wrapped in `docker run`, and builds the wrapped argv when so.

use std::collections::HashMap;

use crate::naming::container_name;

/// Global isolation defaults, overridable per server.
#[derive(Debug, Clone)]
pub struct IsolationDefaults {
    pub enabled: bool,
    pub default_images: HashMap<String, String>,
    pub log_driver: Option<String>,
    pub log_max_size: String,
    pub log_max_file: u32,
    pub network: Option<String>,
    pub memory: Option<String>,
    pub cpus: Option<String>,
}

impl Default for IsolationDefaults {
    fn default() -> Self {
        Self {
            enabled: false,
            default_images: HashMap::new(),
            log_driver: None,
            log_max_size: "100m".to_string(),
            log_max_file: 3,
            network: None,
            memory: None,
            cpus: None,
        }
    }
}

/// Per-server overrides layered on top of [`IsolationDefaults`].
#[derive(Debug, Clone, Default)]
pub struct ServerIsolationConfig {
    pub enabled: Option<bool>,
    pub image: Option<String>,
    pub workdir: Option<String>,
    pub extra_args: Vec<String>,
}

const FALLBACK_IMAGE: &str = "alpine:3.18";

/// Decides whether `command` should be wrapped in `docker run`: commands
/// already starting with `docker` are never re-wrapped, and a server can
/// opt out even when isolation is globally on.
pub fn should_wrap(command: &str, defaults: &IsolationDefaults, server: &ServerIsolationConfig) -> bool {
    if command.trim_start().starts_with("docker") {
        return false;
    }
    server.enabled.unwrap_or(defaults.enabled)
}

/// Detects the runtime family from a command's basename, used to pick a
/// default image.
pub fn detect_runtime(command: &str) -> String {
    let basename = command
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(command)
        .to_lowercase();

    if basename.starts_with("python") {
        "python".to_string()
    } else if basename == "uvx" {
        "uvx".to_string()
    } else if basename == "npx" || basename == "node" {
        "npx".to_string()
    } else {
        "binary".to_string()
    }
}

fn pick_image(runtime: &str, defaults: &IsolationDefaults, server: &ServerIsolationConfig) -> String {
    server
        .image
        .clone()
        .or_else(|| defaults.default_images.get(runtime).cloned())
        .unwrap_or_else(|| FALLBACK_IMAGE.to_string())
}

/// Builds the full `docker run` argv, folding in the original command and
/// args as the container's entrypoint. Name and labels are appended by the
/// supervisor itself; this only builds the body: runtime flags, log limits,
/// resource limits, env, and the image/command tail.
pub struct WrappedRun {
    pub args: Vec<String>,
    pub image: String,
    pub runtime: String,
}

pub fn build_docker_run(
    command: &str,
    args: &[String],
    env: &[(String, String)],
    defaults: &IsolationDefaults,
    server: &ServerIsolationConfig,
) -> WrappedRun {
    let runtime = detect_runtime(command);
    let image = pick_image(&runtime, defaults, server);

    let mut out = vec!["run".to_string(), "--rm".to_string(), "-i".to_string()];

    if let Some(driver) = &defaults.log_driver {
        out.push("--log-driver".to_string());
        out.push(driver.clone());
    }
    out.push("--log-opt".to_string());
    out.push(format!("max-size={}", defaults.log_max_size));
    out.push("--log-opt".to_string());
    out.push(format!("max-file={}", defaults.log_max_file));

    if let Some(network) = &defaults.network {
        out.push("--network".to_string());
        out.push(network.clone());
    }
    if let Some(memory) = &defaults.memory {
        out.push("--memory".to_string());
        out.push(memory.clone());
    }
    if let Some(cpus) = &defaults.cpus {
        out.push("--cpus".to_string());
        out.push(cpus.clone());
    }
    if let Some(workdir) = &server.workdir {
        out.push("--workdir".to_string());
        out.push(workdir.clone());
    }
    for (k, v) in env {
        out.push("-e".to_string());
        out.push(format!("{k}={v}"));
    }
    out.extend(server.extra_args.iter().cloned());
    out.push(image.clone());

    if runtime == "uvx" {
        let escaped = shell_words::join(std::iter::once(command.to_string()).chain(args.iter().cloned()));
        out.push("sh".to_string());
        out.push("-c".to_string());
        out.push(format!("pip install uv && {escaped}"));
    } else {
        out.push(command.to_string());
        out.extend(args.iter().cloned());
    }

    WrappedRun { args: out, image, runtime }
}

/// Suggests a container name for a wrapped run without actually starting
/// one, for callers that want to log the name before spawning.
pub fn preview_container_name(server_name: &str) -> String {
    container_name(server_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_commands_are_never_rewrapped() {
        let defaults = IsolationDefaults { enabled: true, ..Default::default() };
        assert!(!should_wrap("docker", &defaults, &ServerIsolationConfig::default()));
    }

    #[test]
    fn server_can_opt_out_of_global_isolation() {
        let defaults = IsolationDefaults { enabled: true, ..Default::default() };
        let server = ServerIsolationConfig { enabled: Some(false), ..Default::default() };
        assert!(!should_wrap("python3.12", &defaults, &server));
    }

    #[test]
    fn detects_python_runtime_from_versioned_basename() {
        assert_eq!(detect_runtime("python3.12"), "python");
    }

    #[test]
    fn detects_uvx_and_npx() {
        assert_eq!(detect_runtime("uvx"), "uvx");
        assert_eq!(detect_runtime("npx"), "npx");
    }

    #[test]
    fn unknown_command_falls_back_to_binary() {
        assert_eq!(detect_runtime("my-custom-server"), "binary");
    }

    #[test]
    fn falls_back_to_alpine_when_no_image_configured() {
        let defaults = IsolationDefaults::default();
        let server = ServerIsolationConfig::default();
        assert_eq!(pick_image("binary", &defaults, &server), "alpine:3.18");
    }

    #[test]
    fn uvx_command_rewritten_as_shell_pip_install() {
        let defaults = IsolationDefaults::default();
        let server = ServerIsolationConfig::default();
        let run = build_docker_run("uvx", &["mcp-server-fetch".to_string()], &[], &defaults, &server);
        assert!(run.args.contains(&"sh".to_string()));
        let joined = run.args.join(" ");
        assert!(joined.contains("pip install uv"));
        assert!(joined.contains("uvx mcp-server-fetch"));
    }

    #[test]
    fn log_limits_always_present_even_without_explicit_driver() {
        let defaults = IsolationDefaults::default();
        let server = ServerIsolationConfig::default();
        let run = build_docker_run("node", &["server.js".to_string()], &[], &defaults, &server);
        let joined = run.args.join(" ");
        assert!(joined.contains("max-size=100m"));
        assert!(joined.contains("max-file=3"));
    }
}
