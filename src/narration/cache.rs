//! Content-addressed narration cache
//!
//! Layout: `<dir>/<sha256>.<ext>` holds the audio and `<dir>/<sha256>.json`
//! its metadata. Entries are written audio-first, metadata-last, each via a
//! temp file and rename, so a present `.json` always has complete audio.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::Narration;

#[derive(Debug, Serialize, Deserialize)]
struct CacheMeta {
    duration: f64,
    extension: String,
}

/// On-disk narration cache shared across runs
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load an entry; any missing or corrupt piece is a miss
    pub async fn load(&self, key: &str) -> Option<Narration> {
        let meta_raw = fs::read(self.dir.join(format!("{key}.json"))).await.ok()?;
        let meta: CacheMeta = serde_json::from_slice(&meta_raw).ok()?;
        let audio = fs::read(self.dir.join(format!("{key}.{}", meta.extension))).await.ok()?;
        if audio.is_empty() || !meta.duration.is_finite() || meta.duration <= 0.0 {
            return None;
        }
        Some(Narration {
            audio: Bytes::from(audio),
            duration: meta.duration,
            extension: meta.extension,
        })
    }

    pub async fn store(&self, key: &str, narration: &Narration) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let audio_path = self.dir.join(format!("{key}.{}", narration.extension));
        write_atomic(&audio_path, &narration.audio).await?;

        let meta = CacheMeta {
            duration: narration.duration,
            extension: narration.extension.clone(),
        };
        let meta_json = serde_json::to_vec(&meta)?;
        write_atomic(&self.dir.join(format!("{key}.json")), &meta_json).await
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    fs::write(&tmp, contents).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Narration {
        Narration {
            audio: Bytes::from_static(b"ID3fakeaudio"),
            duration: 7.2,
            extension: "mp3".to_string(),
        }
    }

    #[tokio::test]
    async fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path().join("narration"));

        assert!(cache.load("abc").await.is_none());
        cache.store("abc", &sample()).await.unwrap();

        let loaded = cache.load("abc").await.unwrap();
        assert_eq!(loaded, sample());
    }

    #[tokio::test]
    async fn test_corrupt_meta_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        cache.store("k", &sample()).await.unwrap();
        std::fs::write(dir.path().join("k.json"), b"{not json").unwrap();

        assert!(cache.load("k").await.is_none());
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        cache.store("k", &sample()).await.unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["k.json", "k.mp3"]);
    }
}
