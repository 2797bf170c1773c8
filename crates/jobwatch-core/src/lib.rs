//! Core listing model for jobwatch.

use std::fmt;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub mod dates;

pub use dates::resolve_relative_date;

pub const CRATE_NAME: &str = "jobwatch-core";

/// Marker stored when a card carried no date phrase at all.
pub const UNKNOWN_DATE: &str = "unknown";

/// Publication date of a listing as far as the source let us resolve it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PostedDate {
    Date(NaiveDate),
    /// A date phrase was present but did not match any known pattern.
    Unresolved(String),
    Unknown,
}

impl PostedDate {
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(date) => Some(*date),
            _ => None,
        }
    }
}

impl fmt::Display for PostedDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Self::Unresolved(raw) => f.write_str(raw),
            Self::Unknown => f.write_str(UNKNOWN_DATE),
        }
    }
}

impl From<String> for PostedDate {
    fn from(value: String) -> Self {
        if value == UNKNOWN_DATE {
            return Self::Unknown;
        }
        match NaiveDate::parse_from_str(&value, "%Y-%m-%d") {
            Ok(date) => Self::Date(date),
            Err(_) => Self::Unresolved(value),
        }
    }
}

impl From<PostedDate> for String {
    fn from(value: PostedDate) -> Self {
        value.to_string()
    }
}

/// One scraped job posting, identified by its absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub title: String,
    pub company: String,
    pub location: String,
    pub posted_date: PostedDate,
    pub url: String,
    pub last_seen: DateTime<Utc>,
}

/// Fixed-width RFC 3339 rendering used wherever `last_seen` is persisted, so
/// that text ordering matches time ordering.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Case-insensitive substring filter over title, company and location.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListingFilter {
    needle: Option<String>,
}

impl ListingFilter {
    /// Blank or whitespace-only input means "no filter".
    pub fn new(text: Option<&str>) -> Self {
        let needle = text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        Self { needle }
    }

    pub fn is_empty(&self) -> bool {
        self.needle.is_none()
    }

    pub fn matches(&self, listing: &Listing) -> bool {
        let Some(needle) = &self.needle else {
            return true;
        };
        [&listing.title, &listing.company, &listing.location]
            .iter()
            .any(|field| field.to_lowercase().contains(needle.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn listing(title: &str, company: &str, location: &str) -> Listing {
        Listing {
            title: title.to_string(),
            company: company.to_string(),
            location: location.to_string(),
            posted_date: PostedDate::Unknown,
            url: format!("https://fr.indeed.com/viewjob?jk={}", title.len()),
            last_seen: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().unwrap(),
        }
    }

    #[test]
    fn posted_date_text_form_survives_reparse() {
        for text in ["2026-03-01", "unknown", "Publiée il y a plus de 30 jours"] {
            let parsed = PostedDate::from(text.to_string());
            assert_eq!(parsed.to_string(), text);
        }
        assert_eq!(
            PostedDate::from("2026-03-01".to_string()).as_date(),
            NaiveDate::from_ymd_opt(2026, 3, 1)
        );
        assert_eq!(PostedDate::from("unknown".to_string()), PostedDate::Unknown);
    }

    #[test]
    fn posted_date_serializes_as_plain_string() {
        let json = serde_json::to_string(&PostedDate::Date(
            NaiveDate::from_ymd_opt(2026, 1, 9).unwrap(),
        ))
        .unwrap();
        assert_eq!(json, "\"2026-01-09\"");
    }

    #[test]
    fn timestamps_sort_lexically() {
        let early = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().unwrap();
        let late = early + chrono::Duration::milliseconds(1500);
        assert!(format_timestamp(&early) < format_timestamp(&late));
        assert_eq!(parse_timestamp(&format_timestamp(&late)), Some(late));
    }

    #[test]
    fn filter_matches_any_text_field_ignoring_case() {
        let web = listing("Développeur Web", "", "");
        let data = listing("Analyste Data", "", "");
        let filter = ListingFilter::new(Some("web"));
        assert!(filter.matches(&web));
        assert!(!filter.matches(&data));

        let by_city = ListingFilter::new(Some("LYON"));
        assert!(by_city.matches(&listing("Dev", "Acme", "Lyon (69)")));
    }

    #[test]
    fn blank_filter_matches_everything() {
        let filter = ListingFilter::new(Some("   "));
        assert!(filter.is_empty());
        assert!(filter.matches(&listing("Analyste Data", "", "")));
        assert!(ListingFilter::new(None).is_empty());
    }
}
