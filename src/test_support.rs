//! Helpers shared by unit tests that drive external tools

use std::os::unix::fs::PermissionsExt;
use tempfile::TempDir;

/// Write an executable `/bin/sh` script into `dir` and return its path
pub fn write_script(dir: &TempDir, name: &str, body: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to make script executable");
    path.to_string_lossy().into_owned()
}
