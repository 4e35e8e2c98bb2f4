// model/catalog.rs
//
// Fixed catalog of downloadable whisper.cpp GGML model variants.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Identifying metadata for one downloadable model variant. Immutable;
/// constructed from the catalog at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Catalog id, e.g. "base" or "small-q5_0".
    pub id: String,
    /// Deterministic on-disk file name, e.g. "ggml-base.bin".
    pub file_name: String,
    /// Expected weight file size in bytes, when known. Used for the cheap
    /// integrity check before and after download.
    pub expected_size: Option<u64>,
    /// Explicit source URL. None means `{host}/{file_name}`.
    pub url: Option<String>,
}

impl ModelDescriptor {
    pub fn new(id: &str, size_mb: u64) -> Self {
        Self {
            id: id.to_string(),
            file_name: format!("ggml-{}.bin", id),
            expected_size: Some(size_mb * 1024 * 1024),
            url: None,
        }
    }

    /// Final destination path inside the models directory.
    pub fn local_path(&self, models_dir: &Path) -> PathBuf {
        models_dir.join(&self.file_name)
    }

    /// Source URL, filling the `{host}/{file_name}` template unless the
    /// descriptor carries an explicit URL.
    pub fn resolve_url(&self, host: &str) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!("{}/{}", host.trim_end_matches('/'), self.file_name),
        }
    }
}

/// The standard ggerganov/whisper.cpp variants, f16 plus q5_0 quantized.
/// Sizes are approximate and only gate the corruption check loosely.
pub fn catalog() -> Vec<ModelDescriptor> {
    [
        ("tiny", 75),
        ("base", 142),
        ("small", 466),
        ("medium", 1420),
        ("large-v3-turbo", 1540),
        ("large-v3", 2950),
        ("tiny-q5_0", 26),
        ("base-q5_0", 57),
        ("small-q5_0", 181),
        ("medium-q5_0", 514),
        ("large-v3-turbo-q5_0", 547),
        ("large-v3-q5_0", 1080),
    ]
    .into_iter()
    .map(|(id, mb)| ModelDescriptor::new(id, mb))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_templated_url() {
        let desc = ModelDescriptor::new("base", 142);
        assert_eq!(
            desc.resolve_url("https://example.com/models/"),
            "https://example.com/models/ggml-base.bin"
        );
    }

    #[test]
    fn explicit_url_wins() {
        let mut desc = ModelDescriptor::new("base", 142);
        desc.url = Some("https://mirror.test/ggml-base.bin".to_string());
        assert_eq!(
            desc.resolve_url("https://example.com"),
            "https://mirror.test/ggml-base.bin"
        );
    }

    #[test]
    fn catalog_ids_are_unique() {
        let ids: std::collections::HashSet<_> =
            catalog().into_iter().map(|d| d.id).collect();
        assert_eq!(ids.len(), catalog().len());
    }
}
