//! Result pages whose extraction went wrong, kept for turning into fixtures.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::info;

/// Directory of result pages that skipped cards or yielded none at all,
/// usually the first sign that the selector set has drifted from the markup.
#[derive(Debug, Clone)]
pub struct PageArchive {
    root: PathBuf,
}

impl PageArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Only pages that lost cards, or had none, are worth keeping.
    pub fn should_keep(cards_seen: usize, skipped: usize) -> bool {
        skipped > 0 || cards_seen == 0
    }

    /// `20260315T080000Z-2skipped-<12 hex>.html`. The hash suffix keeps two
    /// different pages fetched in the same second apart.
    pub fn file_name(fetched_at: DateTime<Utc>, skipped: usize, html: &str) -> String {
        let digest = Sha256::digest(html.as_bytes());
        let short = hex::encode(&digest[..6]);
        format!(
            "{}-{skipped}skipped-{short}.html",
            fetched_at.format("%Y%m%dT%H%M%SZ")
        )
    }

    pub async fn keep(
        &self,
        fetched_at: DateTime<Utc>,
        skipped: usize,
        html: &str,
    ) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating {}", self.root.display()))?;
        let path = self.root.join(Self::file_name(fetched_at, skipped, html));
        fs::write(&path, html)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), skipped, "kept result page for selector review");
        Ok(path)
    }
}
