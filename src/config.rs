//! Configuration resolution helpers.
//!
//! Mirrors the teacher's provider/base-url resolution pattern: an ordered
//! priority of environment-variable override, then explicit candidates,
//! then a built-in default. Repurposed here to resolve where the external
//! LLM CLI binary lives, which port the local control API binds, and
//! where thread state is persisted on disk.

use std::env;
use std::path::{Path, PathBuf};

/// Default control-API port (SPEC_FULL §4.6), tried before incrementing
/// on `EADDRINUSE`.
pub const DEFAULT_CONTROL_PORT: u16 = 9223;

/// Candidate locations for the external LLM CLI binary, checked in order
/// after the environment override and before a bare `PATH` lookup.
fn candidate_cli_paths(home: &Path) -> Vec<PathBuf> {
    vec![
        home.join(".local/bin/claude"),
        home.join(".npm-global/bin/claude"),
        PathBuf::from("/usr/local/bin/claude"),
        PathBuf::from("/opt/homebrew/bin/claude"),
    ]
}

/// Resolve the external LLM CLI binary's path.
///
/// Priority: `AGENT_SUPERVISOR_CLI_PATH` env var, then a fixed candidate
/// list under `home`, then a few system-wide paths, then a `PATH` lookup
/// for `claude`. Returns `None` only if every candidate is absent and no
/// `PATH` entry resolves it (the caller maps this to a spawn `ENOENT`
/// error at use time).
pub fn resolve_cli_path(home: &Path) -> Option<PathBuf> {
    if let Ok(path) = env::var("AGENT_SUPERVISOR_CLI_PATH") {
        return Some(PathBuf::from(path));
    }

    for candidate in candidate_cli_paths(home) {
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    which_on_path("claude")
}

/// A minimal `which`-style lookup over `PATH`, avoiding a dependency on
/// an external crate for a single string scan.
fn which_on_path(program: &str) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    for dir in env::split_paths(&path_var) {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Resolve the control API's bind port: `AGENT_SUPERVISOR_CONTROL_PORT`
/// if set and parseable, else [`DEFAULT_CONTROL_PORT`].
pub fn resolve_control_port() -> u16 {
    env::var("AGENT_SUPERVISOR_CONTROL_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_CONTROL_PORT)
}

/// Resolve the threads-root directory: `AGENT_SUPERVISOR_HOME` if set,
/// else `<home>/.agent-supervisor/threads`.
pub fn resolve_threads_root(home: &Path) -> PathBuf {
    if let Ok(dir) = env::var("AGENT_SUPERVISOR_HOME") {
        PathBuf::from(dir)
    } else {
        home.join(".agent-supervisor").join("threads")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_control_port_default() {
        // SAFETY: test-local env var, not touched by other tests or the
        // standard library.
        unsafe {
            env::remove_var("AGENT_SUPERVISOR_CONTROL_PORT");
        }
        assert_eq!(resolve_control_port(), DEFAULT_CONTROL_PORT);
    }

    #[test]
    fn test_resolve_control_port_env_override() {
        unsafe {
            env::set_var("AGENT_SUPERVISOR_CONTROL_PORT", "9999");
        }
        assert_eq!(resolve_control_port(), 9999);
        unsafe {
            env::remove_var("AGENT_SUPERVISOR_CONTROL_PORT");
        }
    }

    #[test]
    fn test_resolve_threads_root_default() {
        unsafe {
            env::remove_var("AGENT_SUPERVISOR_HOME");
        }
        let home = Path::new("/home/user");
        assert_eq!(
            resolve_threads_root(home),
            PathBuf::from("/home/user/.agent-supervisor/threads")
        );
    }

    #[test]
    fn test_resolve_threads_root_env_override() {
        unsafe {
            env::set_var("AGENT_SUPERVISOR_HOME", "/custom/threads");
        }
        let home = Path::new("/home/user");
        assert_eq!(resolve_threads_root(home), PathBuf::from("/custom/threads"));
        unsafe {
            env::remove_var("AGENT_SUPERVISOR_HOME");
        }
    }

    #[test]
    fn test_resolve_cli_path_env_override_wins() {
        unsafe {
            env::set_var("AGENT_SUPERVISOR_CLI_PATH", "/custom/claude");
        }
        let home = Path::new("/home/user");
        assert_eq!(resolve_cli_path(home), Some(PathBuf::from("/custom/claude")));
        unsafe {
            env::remove_var("AGENT_SUPERVISOR_CLI_PATH");
        }
    }
}
