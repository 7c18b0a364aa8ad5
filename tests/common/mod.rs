//! Shared fixtures for integration tests: a fake `claude` CLI binary,
//! written as a tiny shell script, that emits a scripted line-JSON
//! transcript instead of actually calling an LLM.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Write an executable shell script at `dir/claude` that prints `body` to
/// stdout and exits 0. Returns the script's path.
pub fn fake_cli_emitting(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("claude");
    std::fs::write(&path, format!("#!/bin/sh\nprintf '%s' '{}'\n", body.replace('\'', "'\\''"))).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Write an executable shell script that sleeps for `millis` milliseconds
/// before emitting `body`, to simulate a turn that's still in flight.
pub fn fake_cli_sleeping_then_emitting(dir: &Path, millis: u64, body: &str) -> PathBuf {
    let path = dir.join("claude");
    let seconds = millis as f64 / 1000.0;
    std::fs::write(
        &path,
        format!(
            "#!/bin/sh\nsleep {seconds}\nprintf '%s' '{}'\n",
            body.replace('\'', "'\\''")
        ),
    )
    .unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}
