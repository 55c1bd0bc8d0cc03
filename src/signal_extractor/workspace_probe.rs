//! Filesystem/package-manifest lookups behind a trait so tests can
//! substitute an in-memory fake instead of touching disk.

use std::path::{Path, PathBuf};

/// Workspace signals used to derive `requiresTests`/`requiresBuild`.
pub trait WorkspaceProbe: Send + Sync {
    fn has_test_script(&self) -> bool;
    fn has_build_script(&self) -> bool;
    fn has_tests_dir(&self) -> bool;
}

/// Real implementation reading `package.json`'s `scripts.{test,build}` and
/// `Cargo.toml`'s dev-dependencies/`tests/` directory off disk, the way the
/// harness's feature registry reads project manifests.
pub struct FsWorkspaceProbe {
    root: PathBuf,
}

impl FsWorkspaceProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn package_json_script(&self, key: &str) -> bool {
        let path = self.root.join("package.json");
        let Ok(contents) = std::fs::read_to_string(&path) else {
            return false;
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&contents) else {
            return false;
        };
        value
            .get("scripts")
            .and_then(|s| s.get(key))
            .and_then(|v| v.as_str())
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false)
    }

    fn cargo_toml_has_tests(&self) -> bool {
        let path = self.root.join("Cargo.toml");
        let Ok(contents) = std::fs::read_to_string(&path) else {
            return false;
        };
        contents.contains("[dev-dependencies]") || contents.contains("[[test]]")
    }
}

fn dir_nonempty(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

impl WorkspaceProbe for FsWorkspaceProbe {
    fn has_test_script(&self) -> bool {
        self.package_json_script("test") || self.cargo_toml_has_tests()
    }

    fn has_build_script(&self) -> bool {
        self.package_json_script("build") || self.root.join("Cargo.toml").is_file()
    }

    fn has_tests_dir(&self) -> bool {
        dir_nonempty(&self.root.join("tests")) || dir_nonempty(&self.root.join("test"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_manifest_yields_false() {
        let probe = FsWorkspaceProbe::new("/nonexistent/path/for/tests");
        assert!(!probe.has_test_script());
        assert!(!probe.has_tests_dir());
    }
}
