//! Repo-Purpose Detector: shallow-clone a URL and infer a purpose and setup
//! hints from marker files, for `purpose == "try-repo"` requests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Marker files inspected in priority order; first match wins.
const MARKERS: &[&str] = &[
    "Cargo.toml",
    "pyproject.toml",
    "setup.py",
    "requirements.txt",
    "package.json",
    "go.mod",
];

/// Deletes the directory it guards when dropped, regardless of which exit
/// path (success, early return, panic-unwind) is taken.
struct TempDirGuard(PathBuf);

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn setup_hints_for(marker: &str) -> Vec<String> {
    match marker {
        "Cargo.toml" => vec!["cargo build || true".to_string()],
        "pyproject.toml" => {
            vec![r#"uv pip install -e ".[dev]" || pip install -e ".[dev]" || true"#.to_string()]
        }
        "setup.py" => vec!["uv pip install -e . || pip install -e . || true".to_string()],
        "requirements.txt" => {
            vec!["uv pip install -r requirements.txt || pip install -r requirements.txt".to_string()]
        }
        "package.json" => vec!["npm install".to_string()],
        "go.mod" => vec!["go build ./... || true".to_string()],
        _ => vec![],
    }
}

fn purpose_for(marker: &str) -> &'static str {
    match marker {
        "Cargo.toml" => "rust",
        "pyproject.toml" | "setup.py" | "requirements.txt" => "python",
        "package.json" => "node",
        "go.mod" => "go",
        _ => "general",
    }
}

/// Shallow-clone `url` into a fresh temp directory, inspect it for marker
/// files, and return `(purpose, setup_hints)`. Falls back to
/// `("general", [])` on any clone failure or timeout. The temp directory is
/// always removed before returning, on every path, via a scoped guard.
pub async fn detect(url: &str) -> (String, Vec<String>) {
    let dir = std::env::temp_dir().join(format!("amp-try-repo-{}", crate::utils::random_hex(8)));
    if tokio::fs::create_dir_all(&dir).await.is_err() {
        return ("general".to_string(), vec![]);
    }
    let guard = TempDirGuard(dir.clone());

    let clone = Command::new("git")
        .args(["clone", "--depth", "1", url, "."])
        .current_dir(&dir)
        .output();

    let cloned = match timeout(Duration::from_secs(60), clone).await {
        Ok(Ok(output)) if output.status.success() => true,
        Ok(Ok(output)) => {
            warn!(url, stderr = %String::from_utf8_lossy(&output.stderr), "repo clone failed");
            false
        }
        Ok(Err(e)) => {
            warn!(url, error = %e, "failed to spawn git clone");
            false
        }
        Err(_) => {
            warn!(url, "repo clone timed out after 60s");
            false
        }
    };

    if !cloned {
        drop(guard);
        return ("general".to_string(), vec![]);
    }

    let result = inspect(&dir).await;
    drop(guard);
    result
}

async fn inspect(dir: &Path) -> (String, Vec<String>) {
    for marker in MARKERS {
        if tokio::fs::metadata(dir.join(marker)).await.is_ok() {
            debug!(marker, "detected repo marker file");
            let mut hints = setup_hints_for(marker);
            if tokio::fs::metadata(dir.join("Makefile")).await.is_ok() {
                hints.push("make || true".to_string());
            }
            return (purpose_for(marker).to_string(), hints);
        }
    }
    ("general".to_string(), vec![])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_hints_match_marker() {
        assert!(setup_hints_for("Cargo.toml")[0].starts_with("cargo build"));
        assert!(setup_hints_for("package.json")[0].starts_with("npm install"));
        assert!(setup_hints_for("unknown.txt").is_empty());
    }

    #[test]
    fn purpose_mapping_covers_every_marker() {
        for marker in MARKERS {
            assert_ne!(purpose_for(marker), "general");
        }
        assert_eq!(purpose_for("Dockerfile"), "general");
    }

    #[tokio::test]
    async fn inspect_picks_first_match_in_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("package.json"), "{}")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("requirements.txt"), "")
            .await
            .unwrap();
        // requirements.txt outranks package.json in MARKERS order.
        let (purpose, hints) = inspect(dir.path()).await;
        assert_eq!(purpose, "python");
        assert!(hints[0].contains("requirements.txt"));
    }

    #[tokio::test]
    async fn inspect_appends_make_hint_when_makefile_present() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("go.mod"), "module x").await.unwrap();
        tokio::fs::write(dir.path().join("Makefile"), "all:\n").await.unwrap();
        let (purpose, hints) = inspect(dir.path()).await;
        assert_eq!(purpose, "go");
        assert_eq!(hints.last().unwrap(), "make || true");
    }

    #[tokio::test]
    async fn inspect_falls_back_to_general_with_no_markers() {
        let dir = tempfile::tempdir().unwrap();
        let (purpose, hints) = inspect(dir.path()).await;
        assert_eq!(purpose, "general");
        assert!(hints.is_empty());
    }

    #[tokio::test]
    #[ignore = "Requires network access"]
    async fn detect_against_a_real_repo() {
        let (purpose, hints) = detect("https://github.com/rust-lang/cargo.git").await;
        assert_eq!(purpose, "rust");
        println!("{hints:?}");
    }
}
