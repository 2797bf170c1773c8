//! SQLite-backed reconciliation store, keyed by listing URL.

use std::str::FromStr;

use jobwatch_core::{format_timestamp, parse_timestamp, Listing, ListingFilter, PostedDate};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use thiserror::Error;
use tracing::{debug, info};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("stored listing {url} has an unreadable last_seen value {value:?}")]
    InvalidTimestamp { url: String, value: String },
}

#[derive(Debug, FromRow)]
struct ListingRow {
    title: String,
    company: String,
    location: String,
    posted_date: String,
    url: String,
    last_seen: String,
}

impl ListingRow {
    fn into_listing(self) -> Result<Listing, StoreError> {
        let last_seen =
            parse_timestamp(&self.last_seen).ok_or_else(|| StoreError::InvalidTimestamp {
                url: self.url.clone(),
                value: self.last_seen.clone(),
            })?;
        Ok(Listing {
            title: self.title,
            company: self.company,
            location: self.location,
            posted_date: PostedDate::from(self.posted_date),
            url: self.url,
            last_seen,
        })
    }
}

/// What one `upsert_all` call did to the stored set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Listings whose URL was unseen, in batch order.
    pub inserted: Vec<Listing>,
    /// Known URLs whose `last_seen` moved forward.
    pub refreshed: usize,
    /// Known URLs left as they were: repeats within the batch, or an
    /// observation no newer than the stored one.
    pub unchanged: usize,
}

/// Owns the connection pool; clone freely, clones share the pool.
#[derive(Debug, Clone)]
pub struct ListingStore {
    pool: SqlitePool,
}

impl ListingStore {
    /// Open (creating if needed) the database at `database_url` and apply
    /// migrations. WAL mode lets the web view read while a cycle writes.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database. A single long-lived connection, since every
    /// new `:memory:` connection would see an empty database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self::from_pool(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Insert unseen URLs and refresh `last_seen` on known ones, in one
    /// transaction.
    ///
    /// A known URL keeps its original title, company, location and date;
    /// its `last_seen` only ever moves forward.
    pub async fn upsert_all(&self, listings: &[Listing]) -> Result<UpsertOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut outcome = UpsertOutcome::default();

        for listing in listings {
            let last_seen = format_timestamp(&listing.last_seen);
            let insert = sqlx::query(
                r#"
                INSERT INTO listings (title, company, location, posted_date, url, last_seen)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(url) DO NOTHING
                "#,
            )
            .bind(&listing.title)
            .bind(&listing.company)
            .bind(&listing.location)
            .bind(listing.posted_date.to_string())
            .bind(&listing.url)
            .bind(&last_seen)
            .execute(&mut *tx)
            .await?;

            if insert.rows_affected() == 1 {
                outcome.inserted.push(listing.clone());
                continue;
            }

            let refresh = sqlx::query(
                r#"
                UPDATE listings
                   SET last_seen = ?1
                 WHERE url = ?2
                   AND last_seen < ?1
                "#,
            )
            .bind(&last_seen)
            .bind(&listing.url)
            .execute(&mut *tx)
            .await?;
            if refresh.rows_affected() == 1 {
                outcome.refreshed += 1;
            } else {
                outcome.unchanged += 1;
                debug!(url = %listing.url, "known listing already at or past this last_seen");
            }
        }

        tx.commit().await?;
        info!(
            batch = listings.len(),
            inserted = outcome.inserted.len(),
            refreshed = outcome.refreshed,
            unchanged = outcome.unchanged,
            "reconciled listings"
        );
        Ok(outcome)
    }

    /// Every stored listing, most recently seen first.
    pub async fn all(&self) -> Result<Vec<Listing>, StoreError> {
        let rows = sqlx::query_as::<_, ListingRow>(
            r#"
            SELECT title, company, location, posted_date, url, last_seen
              FROM listings
             ORDER BY last_seen DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ListingRow::into_listing).collect()
    }

    /// Listings whose title, company or location contains `filter`, ignoring
    /// case. `None` or blank text returns everything.
    pub async fn query(&self, filter: Option<&str>) -> Result<Vec<Listing>, StoreError> {
        let filter = ListingFilter::new(filter);
        let listings = self.all().await?;
        if filter.is_empty() {
            return Ok(listings);
        }
        Ok(listings.into_iter().filter(|l| filter.matches(l)).collect())
    }

    pub async fn find_by_url(&self, url: &str) -> Result<Option<Listing>, StoreError> {
        let row = sqlx::query_as::<_, ListingRow>(
            r#"
            SELECT title, company, location, posted_date, url, last_seen
              FROM listings
             WHERE url = ?1
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ListingRow::into_listing).transpose()
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM listings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use tempfile::tempdir;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).single().unwrap()
    }

    fn listing(key: &str, title: &str, last_seen: DateTime<Utc>) -> Listing {
        Listing {
            title: title.to_string(),
            company: format!("{key} SAS"),
            location: "Paris (75)".to_string(),
            posted_date: PostedDate::Date(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()),
            url: format!("https://fr.indeed.com/rc/clk?jk={key}"),
            last_seen,
        }
    }

    #[tokio::test]
    async fn new_urls_are_reported_once() {
        let store = ListingStore::in_memory().await.unwrap();
        let batch = vec![
            listing("a", "Développeur Web", at(9)),
            listing("b", "Développeur PHP", at(9)),
            listing("c", "Intégrateur", at(9)),
        ];

        let first = store.upsert_all(&batch).await.unwrap();
        assert_eq!(first.inserted, batch);
        assert_eq!(first.refreshed, 0);

        let again = store.upsert_all(&batch).await.unwrap();
        assert!(again.inserted.is_empty());
        assert_eq!(again.refreshed, 0);
        assert_eq!(again.unchanged, 3);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn known_url_keeps_first_payload() {
        let store = ListingStore::in_memory().await.unwrap();
        let original = listing("a", "Développeur Web", at(9));
        store.upsert_all(&[original.clone()]).await.unwrap();

        let mut changed = listing("a", "Développeur Web Senior", at(10));
        changed.company = "Autre".to_string();
        changed.posted_date = PostedDate::Unknown;
        let outcome = store.upsert_all(&[changed]).await.unwrap();
        assert!(outcome.inserted.is_empty());
        assert_eq!(outcome.refreshed, 1);

        let stored = store.find_by_url(&original.url).await.unwrap().unwrap();
        assert_eq!(stored.title, original.title);
        assert_eq!(stored.company, original.company);
        assert_eq!(stored.posted_date, original.posted_date);
        assert_eq!(stored.last_seen, at(10));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn last_seen_never_moves_backwards() {
        let store = ListingStore::in_memory().await.unwrap();
        store.upsert_all(&[listing("a", "Dev", at(12))]).await.unwrap();

        let stale = store.upsert_all(&[listing("a", "Dev", at(8))]).await.unwrap();
        assert_eq!((stale.refreshed, stale.unchanged), (0, 1));
        let stored = store.find_by_url("https://fr.indeed.com/rc/clk?jk=a").await.unwrap().unwrap();
        assert_eq!(stored.last_seen, at(12));

        let later = at(12) + Duration::microseconds(1);
        store.upsert_all(&[listing("a", "Dev", later)]).await.unwrap();
        let stored = store.find_by_url("https://fr.indeed.com/rc/clk?jk=a").await.unwrap().unwrap();
        assert_eq!(stored.last_seen, later);
    }

    #[tokio::test]
    async fn duplicate_url_inside_one_batch_is_new_once() {
        let store = ListingStore::in_memory().await.unwrap();
        let batch = vec![listing("a", "Dev", at(9)), listing("a", "Dev (bis)", at(9))];
        let outcome = store.upsert_all(&batch).await.unwrap();
        assert_eq!(outcome.inserted.len(), 1);
        assert_eq!(outcome.inserted[0].title, "Dev");
        assert_eq!(outcome.refreshed, 0);
        assert_eq!(outcome.unchanged, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn query_orders_by_last_seen_and_filters() {
        let store = ListingStore::in_memory().await.unwrap();
        let mut data = listing("d", "Analyste Data", at(11));
        data.company = String::new();
        data.location = String::new();
        store
            .upsert_all(&[listing("w", "Développeur Web", at(9)), data, listing("p", "Chef de projet", at(10))])
            .await
            .unwrap();

        let titles = |rows: Vec<Listing>| rows.into_iter().map(|l| l.title).collect::<Vec<_>>();
        assert_eq!(
            titles(store.query(None).await.unwrap()),
            vec!["Analyste Data", "Chef de projet", "Développeur Web"]
        );
        assert_eq!(titles(store.query(Some("web")).await.unwrap()), vec!["Développeur Web"]);
        assert_eq!(titles(store.query(Some("PARIS")).await.unwrap()).len(), 2);
        assert_eq!(titles(store.query(Some("  ")).await.unwrap()).len(), 3);
    }

    #[tokio::test]
    async fn unresolved_dates_round_trip_through_storage() {
        let store = ListingStore::in_memory().await.unwrap();
        let mut raw = listing("r", "Dev", at(9));
        raw.posted_date = PostedDate::Unresolved("Publiée il y a plus de 30 jours".to_string());
        let mut unknown = listing("u", "Dev", at(9));
        unknown.posted_date = PostedDate::Unknown;
        store.upsert_all(&[raw.clone(), unknown.clone()]).await.unwrap();

        assert_eq!(store.find_by_url(&raw.url).await.unwrap().unwrap(), raw);
        assert_eq!(store.find_by_url(&unknown.url).await.unwrap().unwrap(), unknown);
    }

    #[tokio::test]
    async fn file_database_persists_across_connections() {
        let dir = tempdir().expect("tempdir");
        let url = format!("sqlite://{}", dir.path().join("jobwatch.db").display());

        let store = ListingStore::connect(&url).await.unwrap();
        store.upsert_all(&[listing("a", "Dev", at(9))]).await.unwrap();
        store.pool().close().await;

        let reopened = ListingStore::connect(&url).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
        assert!(reopened.upsert_all(&[listing("a", "Dev", at(10))]).await.unwrap().inserted.is_empty());
    }
}
