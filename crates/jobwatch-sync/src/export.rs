//! Static HTML snapshot of the stored listings.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use askama::Template;
use chrono::{DateTime, Utc};
use jobwatch_core::Listing;
use tokio::fs;
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_PAGE_TITLE: &str = "Annonces Développeur Web";

struct SnapshotRow<'a> {
    title: &'a str,
    url: &'a str,
    company: &'a str,
    location: &'a str,
    posted_date: String,
}

#[derive(Template)]
#[template(path = "snapshot.html")]
struct SnapshotTemplate<'a> {
    page_title: &'a str,
    generated_at: String,
    rows: Vec<SnapshotRow<'a>>,
}

#[derive(Debug, Clone)]
pub struct SnapshotExporter {
    path: PathBuf,
    page_title: String,
}

impl SnapshotExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            page_title: DEFAULT_PAGE_TITLE.to_string(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.page_title = title.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Listings are rendered in the order given.
    pub fn render(
        &self,
        listings: &[Listing],
        generated_at: DateTime<Utc>,
    ) -> Result<String, askama::Error> {
        let rows = listings
            .iter()
            .map(|l| SnapshotRow {
                title: &l.title,
                url: &l.url,
                company: &l.company,
                location: &l.location,
                posted_date: l.posted_date.to_string(),
            })
            .collect();
        SnapshotTemplate {
            page_title: &self.page_title,
            generated_at: generated_at.format("%Y-%m-%d %H:%M UTC").to_string(),
            rows,
        }
        .render()
    }

    /// Replace the snapshot file wholesale.
    pub async fn export(&self, listings: &[Listing], generated_at: DateTime<Utc>) -> Result<PathBuf> {
        let html = self
            .render(listings, generated_at)
            .context("rendering snapshot template")?;

        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;

        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("snapshot.html");
        let tmp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));
        fs::write(&tmp_path, html.as_bytes())
            .await
            .with_context(|| format!("writing {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("renaming snapshot into {}", self.path.display()))?;

        info!(path = %self.path.display(), listings = listings.len(), "snapshot exported");
        Ok(self.path.clone())
    }
}
