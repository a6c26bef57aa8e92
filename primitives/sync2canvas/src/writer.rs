//! Local artifacts: `{title}.md` and `{title}_payload.json`.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::info;

use crate::convert::ConversionResult;

/// Characters replaced in titles before they become file names.
const UNSAFE_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Errors raised while writing artifacts.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("cannot create output directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Paths of the files written for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub markdown_path: PathBuf,
    pub payload_path: PathBuf,
}

/// Writes converted pages under one output directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
    title_heading: bool,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            title_heading: false,
        }
    }

    /// Start the Markdown file with `# {title}`.
    pub fn with_title_heading(mut self, enabled: bool) -> Self {
        self.title_heading = enabled;
        self
    }

    /// Writes both files, creating the directory if needed. Existing files
    /// are overwritten.
    ///
    /// # Errors
    ///
    /// Returns `WriteError` if the directory or a file cannot be written. A
    /// Markdown file already written is left in place.
    pub async fn write(&self, result: &ConversionResult) -> Result<Artifacts, WriteError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| WriteError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;

        let stem = sanitize_filename(&result.title);
        let artifacts = Artifacts {
            markdown_path: self.dir.join(format!("{stem}.md")),
            payload_path: self.dir.join(format!("{stem}_payload.json")),
        };

        let markdown = if self.title_heading {
            format!("# {}\n\n{}", result.title, result.markdown_text)
        } else {
            result.markdown_text.clone()
        };
        write_file(&artifacts.markdown_path, markdown.as_bytes()).await?;

        let payload = serde_json::to_string(result)?;
        write_file(&artifacts.payload_path, payload.as_bytes()).await?;

        info!(
            markdown = %artifacts.markdown_path.display(),
            payload = %artifacts.payload_path.display(),
            "Wrote artifacts"
        );
        Ok(artifacts)
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), WriteError> {
    fs::write(path, contents)
        .await
        .map_err(|source| WriteError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// Turns a page title into a file stem.
///
/// Path separators, reserved characters and control characters become `-`.
/// A title with nothing left becomes `untitled`.
pub fn sanitize_filename(title: &str) -> String {
    let stem: String = title
        .chars()
        .map(|c| {
            if UNSAFE_CHARS.contains(&c) || c.is_control() {
                '-'
            } else {
                c
            }
        })
        .collect();

    let stem = stem.trim().trim_matches('.');
    if stem.is_empty() || stem.chars().all(|c| c == '-') {
        "untitled".to_string()
    } else {
        stem.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn result(title: &str) -> ConversionResult {
        ConversionResult {
            title: title.to_string(),
            markdown_text: "# Hi\n\nWorld".to_string(),
            author_name: "alice".to_string(),
        }
    }

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_filename("a/b: c?"), "a-b- c-");
        assert_eq!(sanitize_filename("Q3 <draft> \"plan\""), "Q3 -draft- -plan-");
        assert_eq!(sanitize_filename("tab\there"), "tab-here");
    }

    #[test]
    fn sanitize_falls_back_to_untitled() {
        assert_eq!(sanitize_filename("   "), "untitled");
        assert_eq!(sanitize_filename("///"), "untitled");
        assert_eq!(sanitize_filename(".."), "untitled");
    }

    #[tokio::test]
    async fn writes_markdown_and_payload() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("output");

        let artifacts = ArtifactWriter::new(&out).write(&result("Spec")).await.unwrap();

        assert_eq!(artifacts.markdown_path, out.join("Spec.md"));
        assert_eq!(artifacts.payload_path, out.join("Spec_payload.json"));
        assert_eq!(
            std::fs::read_to_string(&artifacts.markdown_path).unwrap(),
            "# Hi\n\nWorld"
        );
        assert_eq!(
            std::fs::read_to_string(&artifacts.payload_path).unwrap(),
            r##"{"title":"Spec","markdown":"# Hi\n\nWorld","author":"alice"}"##
        );
    }

    #[tokio::test]
    async fn rerun_overwrites_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path());

        writer.write(&result("Spec")).await.unwrap();
        let mut second = result("Spec");
        second.markdown_text = "changed".to_string();
        let artifacts = writer.write(&second).await.unwrap();

        assert_eq!(std::fs::read_to_string(artifacts.markdown_path).unwrap(), "changed");
    }

    #[tokio::test]
    async fn title_heading_prefixes_markdown_file_only() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactWriter::new(dir.path())
            .with_title_heading(true)
            .write(&result("Spec"))
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(&artifacts.markdown_path).unwrap(),
            "# Spec\n\n# Hi\n\nWorld"
        );
        let payload: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&artifacts.payload_path).unwrap()).unwrap();
        assert_eq!(payload["markdown"], "# Hi\n\nWorld");
    }

    #[tokio::test]
    async fn unwritable_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let err = ArtifactWriter::new(blocker.join("sub"))
            .write(&result("Spec"))
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::CreateDir { .. }));
    }
}
