use std::path::{Path, PathBuf};

use tracing::debug;

/// Separator between file names inside a single extract cell.
pub const FILE_LIST_SEPARATOR: &str = ";;";

/// Resolves file-extract cells (one file name, or several joined by `;;`) to text.
///
/// Files are looked up under `parent`, or under `parent/<subdir>` when the extraction
/// source spans several input files and each has its own folder of referenced files.
#[derive(Debug, Clone)]
pub struct FileResolver {
    root: PathBuf,
}

impl FileResolver {
    pub fn new(parent: impl AsRef<Path>) -> Self {
        Self {
            root: parent.as_ref().to_path_buf(),
        }
    }

    /// Nests lookups one directory deeper.
    pub fn with_subdir(mut self, subdir: impl AsRef<Path>) -> Self {
        self.root = self.root.join(subdir);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads and concatenates every referenced file that exists.
    ///
    /// Returns `None` when the cell is blank or none of the files exist.
    ///
    /// # Examples
    ///
    /// ```
    /// use craml::source::FileResolver;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// std::fs::write(dir.path().join("a.txt"), "first").unwrap();
    /// std::fs::write(dir.path().join("b.txt"), "second").unwrap();
    ///
    /// let resolver = FileResolver::new(dir.path());
    /// assert_eq!(resolver.resolve("a.txt;;missing.txt;;b.txt").as_deref(), Some("first second"));
    /// assert_eq!(resolver.resolve("missing.txt"), None);
    /// assert_eq!(resolver.resolve(""), None);
    /// ```
    pub fn resolve(&self, cell: &str) -> Option<String> {
        let texts: Vec<String> = cell
            .split(FILE_LIST_SEPARATOR)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .filter_map(|name| self.read(name))
            .collect();

        if texts.is_empty() {
            None
        } else {
            Some(texts.join(" "))
        }
    }

    fn read(&self, name: &str) -> Option<String> {
        let path = self.root.join(name);
        if !path.is_file() {
            debug!(file = %path.display(), "referenced file not found");
            return None;
        }
        match std::fs::read(&path) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                debug!(file = %path.display(), error = %e, "referenced file unreadable");
                None
            }
        }
    }
}
