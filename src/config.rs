use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration loaded from counter-control.toml.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct ControlConfig {
    pub server: ServerConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

/// How to launch the supervised worker.
///
/// The default command is a `counter.py` next to the service; that worker is
/// not shipped with this crate, so deployments point `command` at their own.
///
/// Every `{start}` in `args` is replaced with the start value from the request.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Seconds to wait after SIGINT before sending SIGKILL to the group.
    /// None waits indefinitely.
    pub kill_after_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 4723,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: "./counter.py".to_string(),
            args: vec!["--start".to_string(), "{start}".to_string()],
            kill_after_secs: None,
        }
    }
}

impl WorkerConfig {
    /// Whether `command` resolves to a file, either as a path or via `PATH`.
    pub fn command_exists(&self) -> bool {
        let command = Path::new(&self.command);
        if self.command.contains('/') {
            return command.is_file();
        }
        std::env::var_os("PATH")
            .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(command).is_file()))
            .unwrap_or(false)
    }

    /// Build the worker arguments for a given start value.
    pub fn build_args(&self, start: i64) -> Vec<String> {
        let start = start.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{start}", &start))
            .collect()
    }
}

/// Load config from the given file, or default.
///
/// A missing file is not an error. A file that fails to parse is logged and ignored.
pub fn load_config(path: &Path) -> ControlConfig {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!("failed to parse {}: {e}", path.display());
                ControlConfig::default()
            }
        },
        Err(_) => ControlConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ControlConfig::default();
        assert_eq!(cfg.server.port, 4723);
        assert_eq!(cfg.server.bind, "0.0.0.0");
        assert_eq!(cfg.worker.command, "./counter.py");
        assert_eq!(cfg.worker.kill_after_secs, None);
    }

    #[test]
    fn test_build_args_replaces_start_placeholder() {
        let worker = WorkerConfig::default();
        assert_eq!(worker.build_args(5), vec!["--start", "5"]);
        assert_eq!(worker.build_args(-12), vec!["--start", "-12"]);
    }

    #[test]
    fn test_build_args_no_placeholder() {
        let worker = WorkerConfig {
            command: "sleep".to_string(),
            args: vec!["30".to_string()],
            kill_after_secs: None,
        };
        assert_eq!(worker.build_args(7), vec!["30"]);
    }

    #[test]
    fn test_command_exists() {
        let mut worker = WorkerConfig::default();
        worker.command = "sh".to_string();
        assert!(worker.command_exists());

        worker.command = "/bin/sh".to_string();
        assert!(worker.command_exists());

        worker.command = "nonexistent-binary-xyz".to_string();
        assert!(!worker.command_exists());

        let dir = tempfile::tempdir().unwrap();
        worker.command = dir.path().join("counter.py").display().to_string();
        assert!(!worker.command_exists());
        std::fs::write(&worker.command, "#!/bin/sh\n").unwrap();
        assert!(worker.command_exists());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("nope.toml"));
        assert_eq!(cfg.server.port, 4723);
    }

    #[test]
    fn test_load_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter-control.toml");
        std::fs::write(
            &path,
            "[server]\nport = 9000\n\n[worker]\nkill_after_secs = 3\n",
        )
        .unwrap();

        let cfg = load_config(&path);
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.bind, "0.0.0.0");
        assert_eq!(cfg.worker.command, "./counter.py");
        assert_eq!(cfg.worker.kill_after_secs, Some(3));
    }

    #[test]
    fn test_load_invalid_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();

        let cfg = load_config(&path);
        assert_eq!(cfg.server.port, 4723);
    }
}
