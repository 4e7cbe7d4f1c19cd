use anyhow::{Context, Result};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// Extensions eligible for indexing, compared lower-cased and without the dot.
pub const INDEXABLE_EXTENSIONS: &[&str] = &[
    "py", "java", "cpp", "cc", "cxx", "c", "js", "jsx", "mjs", "ts", "tsx", "go",
];

/// Fragments that exclude a file wherever they appear in the full path string.
/// Substring containment is deliberate (e.g. `env` also hits `environment/`);
/// component-wise matching would change which files get indexed.
const IGNORE_FRAGMENTS: &[&str] = &[
    "__pycache__",
    ".pytest_cache",
    ".venv",
    "env",
    "venv",
    "node_modules",
    ".git",
    ".idea",
    ".vscode",
];

#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Project-relative path with forward slashes.
    pub rel_path: String,
    pub abs_path: PathBuf,
}

/// Enumerate every indexable file under `project_root`, sorted by relative
/// path so repeated scans of an unchanged tree agree byte-for-byte.
pub fn scan_project(project_root: &Path) -> Result<Vec<SourceFile>> {
    let walker = WalkBuilder::new(project_root)
        // The selection rules below decide inclusion; gitignore/hidden
        // filtering would hide files the hash mapping must account for.
        .standard_filters(false)
        .build();

    let mut files = Vec::new();
    for item in walker {
        let dent = match item {
            Ok(d) => d,
            Err(_) => continue,
        };

        if !dent.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }

        let abs_path = dent.into_path();
        if !is_indexable(&abs_path) {
            continue;
        }

        let rel = abs_path
            .strip_prefix(project_root)
            .with_context(|| format!("{} is not under {}", abs_path.display(), project_root.display()))?;
        let rel_path = rel.to_string_lossy().replace('\\', "/");

        files.push(SourceFile { rel_path, abs_path });
    }

    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

/// Selection rules, applied in order: indexable extension, no ignored path
/// fragment, not a test file by naming convention.
pub fn is_indexable(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if !INDEXABLE_EXTENSIONS.contains(&ext.as_str()) {
        return false;
    }

    let full = path.to_string_lossy().replace('\\', "/");
    if IGNORE_FRAGMENTS.iter().any(|frag| full.contains(frag)) {
        return false;
    }

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    if name.starts_with("test_") || name.ends_with("_test.py") {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, "x = 1\n").unwrap();
    }

    #[test]
    fn scans_only_indexable_extensions_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.go");
        touch(dir.path(), "a.py");
        touch(dir.path(), "notes.md");
        touch(dir.path(), "binary.bin");

        let files = scan_project(dir.path()).unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["a.py", "b.go"]);
    }

    #[test]
    fn skips_ignored_directories_and_test_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "src/main.py");
        touch(dir.path(), "node_modules/pkg/index.js");
        touch(dir.path(), ".git/hooks/hook.py");
        touch(dir.path(), "src/test_main.py");
        touch(dir.path(), "src/util_test.py");

        let files = scan_project(dir.path()).unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["src/main.py"]);
    }

    #[test]
    fn ignore_fragments_match_substrings_not_components() {
        // `env` is matched as a substring of the whole path, so a directory
        // named `environment` is excluded too. Intentional fidelity to the
        // documented matching rule.
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "environment/config.py");

        let files = scan_project(dir.path()).unwrap();
        assert!(files.is_empty());
    }
}
