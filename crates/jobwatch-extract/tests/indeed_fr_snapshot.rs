use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use jobwatch_extract::{ListingExtractor, SelectorSet};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Snapshot {
    fetched_at: DateTime<Utc>,
    skipped_cards: Vec<usize>,
    listings: Vec<GoldenListing>,
}

#[derive(Debug, PartialEq, Deserialize)]
struct GoldenListing {
    title: String,
    company: String,
    location: String,
    posted_date: String,
    url: String,
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .expect("workspace root")
}

fn sample_dir() -> PathBuf {
    workspace_root().join("fixtures").join("indeed-fr").join("sample")
}

#[test]
fn indeed_fr_sample_matches_golden_snapshot() {
    let html = fs::read_to_string(sample_dir().join("listing.html")).expect("read fixture");
    let snapshot: Snapshot = serde_json::from_str(
        &fs::read_to_string(sample_dir().join("snapshot.json")).expect("read snapshot"),
    )
    .expect("parse snapshot");

    let set = SelectorSet::from_yaml_file(workspace_root().join("selectors/indeed-fr.yaml"))
        .expect("selector set");
    let extraction = ListingExtractor::new(set)
        .expect("compile selectors")
        .extract(&html, snapshot.fetched_at);

    let actual = extraction
        .listings
        .iter()
        .map(|l| GoldenListing {
            title: l.title.clone(),
            company: l.company.clone(),
            location: l.location.clone(),
            posted_date: l.posted_date.to_string(),
            url: l.url.clone(),
        })
        .collect::<Vec<_>>();
    assert_eq!(actual, snapshot.listings);

    let skipped = extraction.failures.iter().map(|f| f.index).collect::<Vec<_>>();
    assert_eq!(skipped, snapshot.skipped_cards);
    assert!(extraction
        .listings
        .iter()
        .all(|l| l.last_seen == snapshot.fetched_at));
}

#[test]
fn shipped_selector_file_matches_built_in_defaults() {
    let set = SelectorSet::from_yaml_file(workspace_root().join("selectors/indeed-fr.yaml"))
        .expect("selector set");
    assert_eq!(set, SelectorSet::default());
}
