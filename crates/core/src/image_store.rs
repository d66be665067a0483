//! File-backed image store with two flat namespaces.
//!
//! Images live at `{namespace_dir}/{identifier}.{ext}`. There is no index:
//! existence is decided by listing the directory. Writes go to a hidden
//! `.partial` file first and are renamed into place, so a reader sees either
//! nothing or the complete file.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Suffix of in-progress writes. Such files are never resolved.
const PARTIAL_SUFFIX: &str = ".partial";

/// Supported upload content types and the extension stored for each.
const CONTENT_TYPE_EXTENSIONS: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/jpg", "jpg"),
    ("image/webp", "webp"),
];

// ---------------------------------------------------------------------------
// Namespaces
// ---------------------------------------------------------------------------

/// Which directory an identifier lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    /// Uploaded human and garment images.
    Input,
    /// Images written by the execution engine.
    Output,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Maps opaque identifiers to files in the input and output directories.
#[derive(Debug, Clone)]
pub struct ImageStore {
    input_dir: PathBuf,
    output_dir: PathBuf,
}

impl ImageStore {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Directory backing `namespace`.
    pub fn dir(&self, namespace: Namespace) -> &Path {
        match namespace {
            Namespace::Input => &self.input_dir,
            Namespace::Output => &self.output_dir,
        }
    }

    /// Create both namespace directories if they do not exist yet.
    pub async fn ensure_dirs(&self) -> Result<(), CoreError> {
        for namespace in [Namespace::Input, Namespace::Output] {
            let dir = self.dir(namespace);
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                CoreError::Storage(format!("Failed to create {}: {e}", dir.display()))
            })?;
        }
        Ok(())
    }

    /// Write `bytes` under a freshly minted identifier.
    ///
    /// The file extension is derived from `content_type`; unsupported types
    /// are rejected before anything touches the disk.
    pub async fn store(
        &self,
        bytes: &[u8],
        content_type: &str,
        namespace: Namespace,
    ) -> Result<Uuid, CoreError> {
        let ext = extension_for_content_type(content_type)?;
        let id = Uuid::new_v4();
        let dir = self.dir(namespace);

        let final_path = dir.join(format!("{id}.{ext}"));
        let partial_path = dir.join(format!(".{id}.{ext}{PARTIAL_SUFFIX}"));

        tokio::fs::write(&partial_path, bytes).await.map_err(|e| {
            CoreError::Storage(format!("Failed to write {}: {e}", partial_path.display()))
        })?;

        if let Err(e) = tokio::fs::rename(&partial_path, &final_path).await {
            let _ = tokio::fs::remove_file(&partial_path).await;
            return Err(CoreError::Storage(format!(
                "Failed to publish {}: {e}",
                final_path.display()
            )));
        }

        Ok(id)
    }

    /// Find the single file in `namespace` whose name starts with `prefix`.
    ///
    /// Zero matches is [`CoreError::NotFound`]; more than one is
    /// [`CoreError::AmbiguousIdentifier`] rather than an arbitrary pick.
    pub async fn resolve(&self, prefix: &str, namespace: Namespace) -> Result<PathBuf, CoreError> {
        validate_identifier(prefix)?;

        let not_found = || CoreError::NotFound {
            entity: "Image",
            id: prefix.to_string(),
        };

        let dir = self.dir(namespace);
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => {
                return Err(CoreError::Storage(format!(
                    "Failed to list {}: {e}",
                    dir.display()
                )))
            }
        };

        let mut matches = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::Storage(format!("Failed to list {}: {e}", dir.display())))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') || !name.starts_with(prefix) {
                continue;
            }
            matches.push(entry.path());
        }

        match matches.len() {
            0 => Err(not_found()),
            1 => Ok(matches.remove(0)),
            n => Err(CoreError::AmbiguousIdentifier {
                prefix: prefix.to_string(),
                matches: n,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map an upload content type to the stored file extension.
pub fn extension_for_content_type(content_type: &str) -> Result<&'static str, CoreError> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    CONTENT_TYPE_EXTENSIONS
        .iter()
        .find(|(ct, _)| *ct == essence)
        .map(|(_, ext)| *ext)
        .ok_or_else(|| {
            CoreError::Validation(format!(
                "Unsupported content type '{content_type}'. Supported: image/png, image/jpeg, image/webp"
            ))
        })
}

/// Content type to serve for a stored file, based on its extension.
pub fn content_type_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Identifiers are UUIDs or prefixes of them; nothing that could walk
/// out of the namespace directory.
fn validate_identifier(prefix: &str) -> Result<(), CoreError> {
    if prefix.is_empty() {
        return Err(CoreError::Validation("Image identifier must not be empty".into()));
    }
    if !prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CoreError::Validation(format!(
            "Invalid image identifier '{prefix}'"
        )));
    }
    Ok(())
}
