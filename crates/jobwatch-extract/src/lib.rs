//! Result-page parsing: selector set + per-card listing extraction.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use jobwatch_core::{resolve_relative_date, Listing, PostedDate};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub const CRATE_NAME: &str = "jobwatch-extract";

/// CSS selectors describing the source's result markup.
///
/// The upstream markup drifts; bump `version` whenever the set changes so
/// archived pages can be matched to the selectors that parsed them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorSet {
    pub version: u32,
    pub base_url: String,
    pub card: String,
    pub title: String,
    pub company: String,
    pub location: String,
    /// Matched first against the card's ancestors, then its descendants.
    pub link: String,
    pub date: String,
    pub date_markers: Vec<String>,
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self {
            version: 1,
            base_url: "https://fr.indeed.com".to_string(),
            card: ".resultContent".to_string(),
            title: "h2.jobTitle".to_string(),
            company: ".companyName".to_string(),
            location: ".companyLocation".to_string(),
            link: "a[href]".to_string(),
            date: "span".to_string(),
            date_markers: ["il y a", "ago", "aujourd", "hier", "today", "yesterday"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl SelectorSet {
    pub fn from_yaml_str(text: &str) -> Result<Self, SelectorError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, SelectorError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| SelectorError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }
}

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("reading selector set {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing selector set: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid `{name}` selector {selector:?}: {message}")]
    Css {
        name: &'static str,
        selector: String,
        message: String,
    },
    #[error("invalid base url {url:?}: {source}")]
    BaseUrl {
        url: String,
        source: url::ParseError,
    },
}

/// Why a single result card produced no listing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("card has no {field} (selector {selector:?})")]
    MissingField {
        field: &'static str,
        selector: String,
    },
    #[error("card link {href:?} does not resolve against the base url: {source}")]
    BadLink {
        href: String,
        source: url::ParseError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardFailure {
    pub index: usize,
    pub error: ExtractionError,
}

/// Outcome of parsing one result page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub listings: Vec<Listing>,
    pub failures: Vec<CardFailure>,
}

impl Extraction {
    pub fn cards_seen(&self) -> usize {
        self.listings.len() + self.failures.len()
    }
}

#[derive(Debug, Clone)]
pub struct ListingExtractor {
    set: SelectorSet,
    base_url: Url,
    card: Selector,
    title: Selector,
    company: Selector,
    location: Selector,
    link: Selector,
    date: Selector,
    date_markers: Vec<String>,
    offset: FixedOffset,
}

fn compile(name: &'static str, selector: &str) -> Result<Selector, SelectorError> {
    Selector::parse(selector).map_err(|e| SelectorError::Css {
        name,
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

/// Trimmed text of an element with inner whitespace runs collapsed.
fn element_text(el: ElementRef<'_>) -> Option<String> {
    let text = el.text().collect::<String>();
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn select_first_text(card: ElementRef<'_>, selector: &Selector) -> Option<String> {
    card.select(selector).find_map(element_text)
}

impl ListingExtractor {
    pub fn new(set: SelectorSet) -> Result<Self, SelectorError> {
        let base_url = Url::parse(&set.base_url).map_err(|source| SelectorError::BaseUrl {
            url: set.base_url.clone(),
            source,
        })?;
        Ok(Self {
            base_url,
            card: compile("card", &set.card)?,
            title: compile("title", &set.title)?,
            company: compile("company", &set.company)?,
            location: compile("location", &set.location)?,
            link: compile("link", &set.link)?,
            date: compile("date", &set.date)?,
            date_markers: set.date_markers.iter().map(|m| m.to_lowercase()).collect(),
            offset: Utc.fix(),
            set,
        })
    }

    /// Zone in which relative dates are truncated to calendar days.
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn selector_set(&self) -> &SelectorSet {
        &self.set
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// One attempt per result card, in document order.
    pub fn cards<'a>(
        &'a self,
        document: &'a Html,
        fetched_at: DateTime<Utc>,
    ) -> impl Iterator<Item = Result<Listing, ExtractionError>> + 'a {
        document
            .select(&self.card)
            .map(move |card| self.extract_card(card, fetched_at))
    }

    /// Parse a whole result page. A broken card is recorded in
    /// [`Extraction::failures`] and never stops the remaining cards.
    pub fn extract(&self, html: &str, fetched_at: DateTime<Utc>) -> Extraction {
        let document = Html::parse_document(html);
        let mut extraction = Extraction::default();

        for (index, attempt) in self.cards(&document, fetched_at).enumerate() {
            match attempt {
                Ok(listing) => extraction.listings.push(listing),
                Err(error) => {
                    warn!(card = index, %error, "skipping listing card");
                    extraction.failures.push(CardFailure { index, error });
                }
            }
        }

        debug!(
            selectors = self.set.version,
            cards = extraction.cards_seen(),
            listings = extraction.listings.len(),
            "extracted result page"
        );
        extraction
    }

    fn extract_card(
        &self,
        card: ElementRef<'_>,
        fetched_at: DateTime<Utc>,
    ) -> Result<Listing, ExtractionError> {
        let title = select_first_text(card, &self.title).ok_or_else(|| {
            ExtractionError::MissingField {
                field: "title",
                selector: self.set.title.clone(),
            }
        })?;
        let company = select_first_text(card, &self.company).unwrap_or_default();
        let location = select_first_text(card, &self.location).unwrap_or_default();

        let href = self.link_href(card).ok_or_else(|| ExtractionError::MissingField {
            field: "link",
            selector: self.set.link.clone(),
        })?;
        let url = self
            .base_url
            .join(href)
            .map_err(|source| ExtractionError::BadLink {
                href: href.to_string(),
                source,
            })?;

        let posted_date = match self.date_phrase(card) {
            Some(phrase) => {
                resolve_relative_date(&phrase, &fetched_at.with_timezone(&self.offset))
            }
            None => PostedDate::Unknown,
        };

        Ok(Listing {
            title,
            company,
            location,
            posted_date,
            url: url.to_string(),
            last_seen: fetched_at,
        })
    }

    fn link_href<'a>(&self, card: ElementRef<'a>) -> Option<&'a str> {
        card.ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| self.link.matches(el))
            .or_else(|| card.select(&self.link).next())
            .and_then(|el| el.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty())
    }

    /// First date-like element inside the card or after it, stopping at the
    /// next card so a neighbour's date is never borrowed.
    fn date_phrase(&self, card: ElementRef<'_>) -> Option<String> {
        let after_card = std::iter::successors(Some(*card), |node| node.parent())
            .flat_map(|node| node.next_siblings().flat_map(|sibling| sibling.descendants()));

        card.descendants()
            .skip(1)
            .chain(after_card)
            .filter_map(ElementRef::wrap)
            .take_while(|el| !self.card.matches(el))
            .filter(|el| self.date.matches(el))
            .filter_map(element_text)
            .find(|text| {
                let lower = text.to_lowercase();
                self.date_markers
                    .iter()
                    .any(|marker| contains_word_start(&lower, marker))
            })
    }
}

/// `marker` occurs in `text` at the start of a word, so `hier` matches
/// "Publiée hier" but not "Thiers".
fn contains_word_start(text: &str, marker: &str) -> bool {
    text.match_indices(marker).any(|(at, _)| {
        text[..at]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric())
    })
}
