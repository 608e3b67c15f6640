//! Deciding which files of a checked-out repository are worth chunking.
//!
//! The walk is lazy and one-shot. Ignored directories are pruned, every other
//! file goes through [`FileSelector::classify`], and the reason a file was
//! skipped is logged at debug level.

use std::fmt;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, FilterEntry, WalkDir};

/// Files larger than this are never chunked.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 1024 * 1024;

/// Build, lock and dependency artifacts.
const IGNORED_FILE_NAMES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
    "cargo.lock",
    "poetry.lock",
    "pipfile.lock",
    "composer.lock",
    "gemfile.lock",
    "go.sum",
    "uv.lock",
    "thumbs.db",
    "license",
    "licence",
];

/// Docs, data, media, binary and archive formats.
const IGNORED_EXTENSIONS: &[&str] = &[
    // docs
    "md", "markdown", "rst", "txt", "pdf", "doc", "docx", "odt", "rtf",
    // data
    "csv", "tsv", "json", "jsonl", "xml", "lock", "log", "sqlite", "db", "parquet", "pkl", "npy",
    "npz", "h5",
    // media
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "icns", "svg", "webp", "tiff", "mp3", "mp4", "wav",
    "ogg", "mov", "avi", "webm", "woff", "woff2", "ttf", "otf", "eot",
    // binary
    "exe", "dll", "so", "dylib", "bin", "o", "a", "obj", "class", "jar", "pyc", "pyo", "wasm",
    // archives
    "zip", "tar", "gz", "tgz", "bz2", "xz", "7z", "rar",
];

/// Matched case-insensitively as substrings of the relative path.
const IGNORED_DIR_PATTERNS: &[&str] = &[
    "test",
    "example",
    "node_modules",
    "vendor",
    ".git",
    "__pycache__",
    "dist",
    "build",
    "target",
    "venv",
    "coverage",
    ".idea",
    ".vscode",
];

/// A file the chunker should read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub absolute: PathBuf,
    /// Path relative to the walk root, always `/`-separated.
    pub relative: String,
}

/// Why a file was left out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Hidden,
    IgnoredName,
    IgnoredExtension(String),
    IgnoredDirectory(&'static str),
    TooLarge(u64),
    Unreadable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hidden => write!(f, "hidden file"),
            Self::IgnoredName => write!(f, "build or lock artifact"),
            Self::IgnoredExtension(ext) => write!(f, "ignored extension .{ext}"),
            Self::IgnoredDirectory(pattern) => write!(f, "path matches '{pattern}'"),
            Self::TooLarge(size) => write!(f, "{size} bytes is over the size limit"),
            Self::Unreadable(e) => write!(f, "stat failed: {e}"),
        }
    }
}

/// Applies the ignore rules to a directory tree.
#[derive(Debug, Clone)]
pub struct FileSelector {
    max_file_bytes: u64,
}

impl Default for FileSelector {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FILE_BYTES)
    }
}

impl FileSelector {
    pub fn new(max_file_bytes: u64) -> Self {
        Self { max_file_bytes }
    }

    /// Walks `root` lazily, yielding eligible files in file-name order.
    /// Does not follow symlinks.
    pub fn walk(&self, root: &Path) -> Walk {
        let entries = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(keep_entry as fn(&DirEntry) -> bool);
        Walk {
            selector: self.clone(),
            root: root.to_path_buf(),
            entries,
        }
    }

    /// Rules 1–5 in order; the first match wins.
    pub fn classify(&self, absolute: &Path, relative: &str) -> Result<(), SkipReason> {
        let file_name = absolute
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if file_name.starts_with('.') {
            return Err(SkipReason::Hidden);
        }
        let lower_name = file_name.to_lowercase();
        if IGNORED_FILE_NAMES.contains(&lower_name.as_str()) {
            return Err(SkipReason::IgnoredName);
        }
        if let Some(ext) = absolute.extension().map(|e| e.to_string_lossy().to_lowercase()) {
            if IGNORED_EXTENSIONS.contains(&ext.as_str()) {
                return Err(SkipReason::IgnoredExtension(ext));
            }
        }
        if let Some(pattern) = ignored_pattern(relative) {
            return Err(SkipReason::IgnoredDirectory(pattern));
        }
        match std::fs::metadata(absolute) {
            Ok(meta) if meta.len() > self.max_file_bytes => Err(SkipReason::TooLarge(meta.len())),
            Ok(_) => Ok(()),
            Err(e) => Err(SkipReason::Unreadable(e.to_string())),
        }
    }
}

/// Iterator returned by [`FileSelector::walk`].
pub struct Walk {
    selector: FileSelector,
    root: PathBuf,
    entries: FilterEntry<walkdir::IntoIter, fn(&DirEntry) -> bool>,
}

impl Iterator for Walk {
    type Item = SelectedFile;

    fn next(&mut self) -> Option<SelectedFile> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("skipping unreadable entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let absolute = entry.path();
            let relative = relative_path(&self.root, absolute);
            match self.selector.classify(absolute, &relative) {
                Ok(()) => {
                    return Some(SelectedFile {
                        absolute: absolute.to_path_buf(),
                        relative,
                    })
                }
                Err(reason) => tracing::debug!("skip {relative}: {reason}"),
            }
        }
    }
}

/// Prunes hidden and ignored directories. The root itself is always kept.
fn keep_entry(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return false;
    }
    ignored_pattern(&name).is_none()
}

fn ignored_pattern(path: &str) -> Option<&'static str> {
    let lower = path.to_lowercase();
    IGNORED_DIR_PATTERNS
        .iter()
        .copied()
        .find(|pattern| lower.contains(pattern))
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn touch(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn selected(root: &Path) -> Vec<String> {
        FileSelector::default().walk(root).map(|f| f.relative).collect()
    }

    #[test]
    fn keeps_source_and_skips_noise() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "src/app.py", "print('hi')");
        touch(root, "src/lib.rs", "fn main() {}");
        touch(root, ".env", "SECRET=1");
        touch(root, "package-lock.json", "{}");
        touch(root, "README.md", "# readme");
        touch(root, "logo.png", "not really a png");
        touch(root, "node_modules/left-pad/index.js", "module.exports = 1");
        touch(root, "tests/test_app.py", "def test(): pass");
        touch(root, "src/Examples.py", "x = 1");

        assert_eq!(selected(root), vec!["src/app.py", "src/lib.rs"]);
    }

    #[test]
    fn walk_order_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.py", "a.py", "c/d.py", "c/a.py"] {
            touch(dir.path(), name, "x = 1");
        }
        assert_eq!(selected(dir.path()), vec!["a.py", "b.py", "c/a.py", "c/d.py"]);
    }

    #[test]
    fn classify_reports_first_matching_rule() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "vendor/.hidden.md", "");
        touch(root, "vendor/yarn.lock", "");
        touch(root, "vendor/notes.TXT", "");
        touch(root, "vendor/lib.js", "");
        let s = FileSelector::default();

        assert_eq!(
            s.classify(&root.join("vendor/.hidden.md"), "vendor/.hidden.md"),
            Err(SkipReason::Hidden)
        );
        assert_eq!(
            s.classify(&root.join("vendor/yarn.lock"), "vendor/yarn.lock"),
            Err(SkipReason::IgnoredName)
        );
        assert_eq!(
            s.classify(&root.join("vendor/notes.TXT"), "vendor/notes.TXT"),
            Err(SkipReason::IgnoredExtension("txt".into()))
        );
        assert_eq!(
            s.classify(&root.join("vendor/lib.js"), "vendor/lib.js"),
            Err(SkipReason::IgnoredDirectory("vendor"))
        );
    }

    #[test]
    fn oversized_and_missing_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "big.py", &"x".repeat(64));
        let s = FileSelector::new(32);

        assert_eq!(
            s.classify(&dir.path().join("big.py"), "big.py"),
            Err(SkipReason::TooLarge(64))
        );
        assert!(matches!(
            s.classify(&dir.path().join("gone.py"), "gone.py"),
            Err(SkipReason::Unreadable(_))
        ));
    }

    #[test]
    fn pattern_match_is_case_insensitive() {
        assert_eq!(ignored_pattern("Src/Vendor/x.js"), Some("vendor"));
        assert_eq!(ignored_pattern("src/app.py"), None);
    }
}
