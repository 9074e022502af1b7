//! Integration tests for runcell
//!
//! The engine and workspace tests only need a POSIX shell. Tests that drive
//! real compilers and interpreters are behind a feature flag:
//!    cargo test -p runcell --features integration-tests
//!
//! Toolchains missing from the host are skipped with a note on stderr.

use std::path::Path;

use runcell::config::Config;

#[cfg(unix)]
mod engine;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Helper to get fixture file content
#[cfg(feature = "integration-tests")]
pub(crate) fn fixture_source(name: &str) -> String {
    let path = format!("{FIXTURES_PATH}/sources/{name}");
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

/// Config with shell-based languages rooted at `workspace_root`
///
/// - `sh` runs the source with `sh`.
/// - `shc` syntax-checks the source as its compile step, copies it to the
///   artifact and runs the artifact.
/// - `slowc` has a compile step that never finishes in time.
pub(crate) fn shell_config(workspace_root: &Path) -> Config {
    let toml = format!(
        r#"
workspace_root = "{root}"
max_concurrent = 4

[limits]
max_source_bytes = 4096
output_limit = 65536

[languages.sh]
name = "POSIX shell"
source_name = "main.sh"

[languages.sh.run]
command = ["sh", "{{source}}"]
timeout_ms = 1000

[languages.shc]
name = "Checked shell"
source_name = "main.sh"

[languages.shc.compile]
command = ["sh", "-c", "sh -n \"$1\" && cp \"$1\" \"$2\"", "sh", "{{source}}", "{{output}}"]
output_name = "main"
timeout_ms = 2000

[languages.shc.run]
command = ["sh", "{{output}}"]
timeout_ms = 1000

[languages.slowc]
name = "Slow compiler"
source_name = "main.sh"

[languages.slowc.compile]
command = ["sleep", "30"]
timeout_ms = 300

[languages.slowc.run]
command = ["sh", "{{output}}"]
"#,
        root = workspace_root.display()
    );
    Config::parse_toml(&toml).expect("shell test config should be valid")
}
