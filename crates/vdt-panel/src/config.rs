use std::path::PathBuf;

use clap::Parser;
use vdt_core::bridge_ipc::DEFAULT_MAX_FRAME_BYTES;

#[derive(Parser, Debug, Default)]
#[command(name = "vdt-panel", about = "Terminal inspector panel for a Vue target")]
pub struct Args {
    /// Unix socket the target agent listens on.
    #[arg(long)]
    pub socket: Option<PathBuf>,
    /// Run as an embedded panel: start hidden and report render faults.
    #[arg(long)]
    pub embedded: Option<bool>,
    /// `dark` or `light`.
    #[arg(long)]
    pub theme: Option<String>,
    #[arg(long)]
    pub diagnostics_dir: Option<PathBuf>,
    #[arg(long)]
    pub max_frame_bytes: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub socket_path: PathBuf,
    pub embedded: bool,
    pub dark_theme: bool,
    pub diagnostics_dir: Option<PathBuf>,
    pub max_frame_bytes: usize,
}

pub fn load_config(args: Args) -> Config {
    resolve_config(args, |key| std::env::var(key).ok())
}

/// Flags win over environment values; empty environment values are ignored.
pub fn resolve_config(args: Args, env: impl Fn(&str) -> Option<String>) -> Config {
    let env = |key: &str| env(key).filter(|value| !value.trim().is_empty());
    let socket_path = args
        .socket
        .or_else(|| env("VDT_SOCKET").map(PathBuf::from))
        .unwrap_or_else(|| default_socket_path(env("XDG_RUNTIME_DIR")));
    let embedded = args
        .embedded
        .or_else(|| env("VDT_EMBEDDED").and_then(|value| parse_bool_flag(&value)))
        .unwrap_or(false);
    let dark_theme = args
        .theme
        .or_else(|| env("VDT_THEME"))
        .map(|value| parse_theme(&value))
        .unwrap_or(false);
    let diagnostics_dir = args
        .diagnostics_dir
        .or_else(|| env("VDT_DIAGNOSTICS_DIR").map(PathBuf::from));
    let max_frame_bytes = args
        .max_frame_bytes
        .or_else(|| env("VDT_MAX_FRAME_BYTES").and_then(|value| value.trim().parse().ok()))
        .filter(|bytes| *bytes > 0)
        .unwrap_or(DEFAULT_MAX_FRAME_BYTES);
    Config {
        socket_path,
        embedded,
        dark_theme,
        diagnostics_dir,
        max_frame_bytes,
    }
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_theme(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("dark")
}

fn default_socket_path(runtime_dir: Option<String>) -> PathBuf {
    runtime_dir
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("vdt")
        .join("bridge.sock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn parse_bool_flag_accepts_common_spellings() {
        assert_eq!(parse_bool_flag("1"), Some(true));
        assert_eq!(parse_bool_flag(" YES "), Some(true));
        assert_eq!(parse_bool_flag("off"), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
    }

    #[test]
    fn defaults_without_flags_or_env() {
        let config = resolve_config(Args::default(), env_of(&[]));
        assert_eq!(config.socket_path, PathBuf::from("/tmp/vdt/bridge.sock"));
        assert!(!config.embedded);
        assert!(!config.dark_theme);
        assert_eq!(config.diagnostics_dir, None);
        assert_eq!(config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
    }

    #[test]
    fn env_fills_in_missing_flags() {
        let config = resolve_config(
            Args::default(),
            env_of(&[
                ("XDG_RUNTIME_DIR", "/run/user/1000"),
                ("VDT_EMBEDDED", "on"),
                ("VDT_THEME", "Dark"),
                ("VDT_DIAGNOSTICS_DIR", "/var/tmp/vdt"),
                ("VDT_MAX_FRAME_BYTES", "4096"),
            ]),
        );
        assert_eq!(
            config.socket_path,
            PathBuf::from("/run/user/1000/vdt/bridge.sock")
        );
        assert!(config.embedded);
        assert!(config.dark_theme);
        assert_eq!(config.diagnostics_dir, Some(PathBuf::from("/var/tmp/vdt")));
        assert_eq!(config.max_frame_bytes, 4096);
    }

    #[test]
    fn flags_take_precedence_over_env() {
        let args = Args::parse_from([
            "vdt-panel",
            "--socket",
            "/srv/target.sock",
            "--embedded",
            "false",
            "--theme",
            "light",
            "--max-frame-bytes",
            "0",
        ]);
        let config = resolve_config(
            args,
            env_of(&[
                ("VDT_SOCKET", "/ignored.sock"),
                ("VDT_EMBEDDED", "1"),
                ("VDT_THEME", "dark"),
                ("VDT_MAX_FRAME_BYTES", "1024"),
            ]),
        );
        assert_eq!(config.socket_path, PathBuf::from("/srv/target.sock"));
        assert!(!config.embedded);
        assert!(!config.dark_theme);
        assert_eq!(config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let config = resolve_config(
            Args::default(),
            env_of(&[("VDT_SOCKET", "  "), ("XDG_RUNTIME_DIR", "")]),
        );
        assert_eq!(config.socket_path, PathBuf::from("/tmp/vdt/bridge.sock"));
    }
}
