//! Axum + Askama search view over the stored listings.

use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{RawQuery, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use jobwatch_core::Listing;
use jobwatch_storage::ListingStore;
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "jobwatch-web";

#[derive(Clone)]
pub struct AppState {
    pub store: ListingStore,
}

impl AppState {
    pub fn new(store: ListingStore) -> Self {
        Self { store }
    }
}

/// A listing with its dates formatted for the HTML view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebListing {
    pub title: String,
    pub company: String,
    pub location: String,
    pub posted_date: String,
    pub url: String,
    pub last_seen: String,
}

impl From<Listing> for WebListing {
    fn from(l: Listing) -> Self {
        Self {
            posted_date: l.posted_date.to_string(),
            last_seen: l.last_seen.format("%Y-%m-%d %H:%M").to_string(),
            title: l.title,
            company: l.company,
            location: l.location,
            url: l.url,
        }
    }
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    search: String,
    listings: Vec<WebListing>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/listings", get(api_listings_handler))
        .route("/health", get(health_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(store: ListingStore, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "web view listening");
    axum::serve(listener, app(AppState::new(store))).await?;
    Ok(())
}

/// Pull `q` out of the raw query string. Undecodable input degrades to
/// replacement characters rather than a rejection.
fn search_term(raw: Option<&str>) -> String {
    raw.and_then(|raw| {
        url::form_urlencoded::parse(raw.as_bytes())
            .find(|(key, _)| key == "q")
            .map(|(_, value)| value.trim().to_string())
    })
    .unwrap_or_default()
}

async fn index_handler(
    State(state): State<Arc<AppState>>,
    RawQuery(raw): RawQuery,
) -> Response {
    let search = search_term(raw.as_deref());
    match state.store.query(Some(search.as_str())).await {
        Ok(listings) => render_html(IndexTemplate {
            search,
            listings: listings.into_iter().map(WebListing::from).collect(),
        }),
        Err(err) => server_error(err.into()),
    }
}

async fn api_listings_handler(
    State(state): State<Arc<AppState>>,
    RawQuery(raw): RawQuery,
) -> Response {
    let search = search_term(raw.as_deref());
    match state.store.query(Some(search.as_str())).await {
        Ok(listings) => Json(listings).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}
