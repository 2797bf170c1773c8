//! Relative publication phrases ("aujourd'hui", "il y a 3 jours", "5 hours ago",
//! "ago 3 days") turned into calendar dates.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, TimeZone};
use regex::Regex;

use crate::PostedDate;

const TODAY_TOKENS: &[&str] = &["aujourd", "today", "just posted"];
const YESTERDAY_TOKENS: &[&str] = &["hier", "yesterday"];

static AGO_FR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"il y a\s+(\d+)\s+(\w+)").expect("static regex"));
static AGO_EN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\+?\s+(\w+)\s+ago").expect("static regex"));
static AGO_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bago\s+(\d+)\s+(\w+)").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgoUnit {
    Days,
    Hours,
    Minutes,
}

impl AgoUnit {
    fn parse(word: &str) -> Option<Self> {
        if word.starts_with("jour") || word.starts_with("day") {
            Some(Self::Days)
        } else if word.starts_with("heure") || word.starts_with("hour") || word == "h" {
            Some(Self::Hours)
        } else if word.starts_with("min") {
            Some(Self::Minutes)
        } else {
            None
        }
    }

    fn delta(self, amount: i64) -> Option<Duration> {
        match self {
            Self::Days => Duration::try_days(amount),
            Self::Hours => Duration::try_hours(amount),
            Self::Minutes => Duration::try_minutes(amount),
        }
    }
}

/// Resolve `text` against `reference`.
///
/// "Today" and "yesterday" tokens win over the numeric pattern. Anything that
/// does not resolve (including out-of-range amounts) comes back as
/// [`PostedDate::Unresolved`] carrying the input unchanged.
pub fn resolve_relative_date<Tz: TimeZone>(text: &str, reference: &DateTime<Tz>) -> PostedDate {
    let lower = text.to_lowercase();
    let today = reference.date_naive();

    if TODAY_TOKENS.iter().any(|token| lower.contains(token)) {
        return PostedDate::Date(today);
    }
    if YESTERDAY_TOKENS.iter().any(|token| lower.contains(token)) {
        if let Some(yesterday) = today.pred_opt() {
            return PostedDate::Date(yesterday);
        }
    }
    if let Some(date) = numeric_ago(&lower, reference) {
        return PostedDate::Date(date);
    }

    PostedDate::Unresolved(text.to_string())
}

fn numeric_ago<Tz: TimeZone>(lower: &str, reference: &DateTime<Tz>) -> Option<NaiveDate> {
    let caps = AGO_FR
        .captures(lower)
        .or_else(|| AGO_EN.captures(lower))
        .or_else(|| AGO_PREFIX.captures(lower))?;
    let amount: i64 = caps[1].parse().ok()?;
    let unit = AgoUnit::parse(&caps[2])?;
    let delta = unit.delta(amount)?;
    reference
        .clone()
        .checked_sub_signed(delta)
        .map(|shifted| shifted.date_naive())
}
