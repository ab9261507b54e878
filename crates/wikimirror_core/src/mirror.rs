use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use walkdir::WalkDir;

pub const CONTENT_EXTENSION: &str = "txt";
pub const HTML_EXTENSION: &str = "html";
pub const METADATA_EXTENSION: &str = "xml";

/// Per-site mirror directory.
///
/// Every page is stored as sibling files `<name>.txt`, `<name>.html` and `<name>.xml`.
/// Pages with attached files also get a `<name>/` directory holding each file plus a
/// `<file>.xml` metadata document.
#[derive(Debug, Clone)]
pub struct MirrorLayout {
    root: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MirrorStats {
    pub pages: usize,
    pub html_documents: usize,
    pub metadata_documents: usize,
    pub attachment_dirs: usize,
    pub attachment_files: usize,
}

impl MirrorLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create mirror directory {}", self.root.display()))
    }

    pub fn content_path(&self, local_name: &str) -> PathBuf {
        self.sibling(local_name, CONTENT_EXTENSION)
    }

    pub fn html_path(&self, local_name: &str) -> PathBuf {
        self.sibling(local_name, HTML_EXTENSION)
    }

    pub fn metadata_path(&self, local_name: &str) -> PathBuf {
        self.sibling(local_name, METADATA_EXTENSION)
    }

    pub fn attachment_dir(&self, local_name: &str) -> PathBuf {
        self.root.join(local_name)
    }

    pub fn attachment_path(&self, local_name: &str, file_name: &str) -> Result<PathBuf> {
        validate_file_name(file_name)?;
        Ok(self.attachment_dir(local_name).join(file_name))
    }

    pub fn attachment_metadata_path(&self, local_name: &str, file_name: &str) -> Result<PathBuf> {
        validate_file_name(file_name)?;
        Ok(self
            .attachment_dir(local_name)
            .join(format!("{file_name}.{METADATA_EXTENSION}")))
    }

    /// A page is present locally exactly when its content file exists.
    pub fn is_present(&self, local_name: &str) -> bool {
        self.content_path(local_name).is_file()
    }

    /// True when either the content file or the metadata document exists. Pages without a
    /// content body only ever get the latter.
    pub fn has_record(&self, local_name: &str) -> bool {
        self.is_present(local_name) || self.metadata_path(local_name).is_file()
    }

    /// Create the attachment directory if needed. Never removes anything.
    pub fn ensure_attachment_dir(&self, local_name: &str) -> Result<PathBuf> {
        let dir = self.attachment_dir(local_name);
        if !dir.is_dir() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(dir)
    }

    pub fn list_local_pages(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut pages = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.with_context(|| format!("failed to list {}", self.root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                log::warn!(
                    "ignoring non UTF-8 file name in mirror: {}",
                    entry.path().display()
                );
                continue;
            };
            if let Some(stem) = name.strip_suffix(&format!(".{CONTENT_EXTENSION}"))
                && !stem.is_empty()
            {
                pages.push(stem.to_string());
            }
        }
        pages.sort();
        Ok(pages)
    }

    /// Remove the page's content, HTML and metadata files. The attachment directory stays.
    pub fn remove_page(&self, local_name: &str) -> Result<Vec<PathBuf>> {
        validate_file_name(local_name)?;
        let mut removed = Vec::new();
        for path in [
            self.metadata_path(local_name),
            self.html_path(local_name),
            self.content_path(local_name),
        ] {
            if path.is_file() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                removed.push(path);
            }
        }
        Ok(removed)
    }

    pub fn scan_stats(&self) -> Result<MirrorStats> {
        let mut stats = MirrorStats::default();
        if !self.root.exists() {
            return Ok(stats);
        }
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(2) {
            let entry = entry.with_context(|| format!("failed to scan {}", self.root.display()))?;
            let path = entry.path();
            if entry.depth() == 1 && entry.file_type().is_dir() {
                stats.attachment_dirs += 1;
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let extension = path.extension().and_then(|value| value.to_str());
            if entry.depth() == 2 {
                if extension != Some(METADATA_EXTENSION) {
                    stats.attachment_files += 1;
                }
                continue;
            }
            match extension {
                Some(CONTENT_EXTENSION) => stats.pages += 1,
                Some(HTML_EXTENSION) => stats.html_documents += 1,
                Some(METADATA_EXTENSION) => stats.metadata_documents += 1,
                _ => {}
            }
        }
        Ok(stats)
    }

    fn sibling(&self, local_name: &str, extension: &str) -> PathBuf {
        self.root.join(format!("{local_name}.{extension}"))
    }
}

pub fn write_text(path: &Path, text: &str) -> Result<()> {
    fs::write(path, text.as_bytes()).with_context(|| format!("failed to write {}", path.display()))
}

/// Reject names that would not land as a single entry inside their directory.
pub fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        bail!("invalid file name: '{name}'");
    }
    if name.contains(|ch: char| matches!(ch, '/' | '\\' | '\0')) {
        bail!("file name escapes its directory: '{name}'");
    }
    Ok(())
}
