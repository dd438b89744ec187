//! Output artifact discovery and encoding.
//!
//! With `--no-upload` the tool leaves the converted PDF in its working
//! directory under a name of its own choosing. Rather than predicting that
//! name, each target runs in an otherwise empty directory and we pick up
//! whatever PDF appears there. Response bodies must be text, so the bytes go
//! out base64-encoded (standard alphabet, padded).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, warn};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// A file the tool produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl Artifact {
    pub fn to_base64(&self) -> String {
        let b64 = STANDARD.encode(&self.data);
        debug!("Encoded {} → {} bytes base64", self.file_name, b64.len());
        b64
    }
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Find and read the first PDF (by file name) in `dir`.
///
/// Returns `None` when the directory holds no PDF or cannot be read; a
/// missing artifact never fails a target.
pub async fn collect(dir: &Path) -> Option<Artifact> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot scan '{}' for artifacts: {}", dir.display(), e);
            return None;
        }
    };

    let mut candidates = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let path = entry.path();
                let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
                if is_file && is_pdf(&path) {
                    candidates.push(path);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Error while scanning '{}': {}", dir.display(), e);
                break;
            }
        }
    }
    candidates.sort();

    let path = candidates.into_iter().next()?;
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) => {
            warn!("Cannot read artifact '{}': {}", path.display(), e);
            return None;
        }
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    debug!("Collected artifact '{}' ({} bytes)", file_name, data.len());
    Some(Artifact {
        file_name,
        content_type: PDF_CONTENT_TYPE.to_string(),
        size_bytes: data.len() as u64,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_roundtrips_bytes() {
        let artifact = Artifact {
            file_name: "x.pdf".into(),
            content_type: PDF_CONTENT_TYPE.into(),
            size_bytes: 5,
            data: b"%PDF-".to_vec(),
        };
        let b64 = artifact.to_base64();
        assert_eq!(b64, "JVBERi0=");
        assert_eq!(STANDARD.decode(b64).unwrap(), b"%PDF-");
    }

    #[test]
    fn pdf_extension_is_case_insensitive() {
        assert!(is_pdf(Path::new("Paper_.PDF")));
        assert!(is_pdf(Path::new("a.pdf")));
        assert!(!is_pdf(Path::new("a.pdf.part")));
        assert!(!is_pdf(Path::new("pdf")));
    }

    #[tokio::test]
    async fn picks_first_pdf_by_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("log.txt"), "noise").unwrap();
        std::fs::write(dir.path().join("b_.pdf"), "%PDF-b").unwrap();
        std::fs::write(dir.path().join("a_.pdf"), "%PDF-a").unwrap();
        std::fs::create_dir(dir.path().join("dir.pdf")).unwrap();

        let artifact = collect(dir.path()).await.expect("artifact");
        assert_eq!(artifact.file_name, "a_.pdf");
        assert_eq!(artifact.data, b"%PDF-a");
        assert_eq!(artifact.size_bytes, 6);
    }

    #[tokio::test]
    async fn empty_or_missing_dir_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect(dir.path()).await.is_none());
        assert!(collect(&dir.path().join("missing")).await.is_none());
    }
}
