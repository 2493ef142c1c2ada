//! The Movie Database (TMDB) v3 provider

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{MetadataProvider, SearchCandidate};
use crate::core::error::{CatalogError, Result};
use crate::db::models::{Actor, ExternalMetadata, ProviderDetails};

pub const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3";
const IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p/w500";
const BASE_RELEVANCE: f64 = 0.8;
const MAX_CAST: usize = 10;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    first_air_date: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    poster_path: Option<String>,
    #[serde(default)]
    vote_average: f64,
}

#[derive(Debug, Default, Deserialize)]
struct DetailsResponse {
    title: Option<String>,
    name: Option<String>,
    original_title: Option<String>,
    original_name: Option<String>,
    overview: Option<String>,
    release_date: Option<String>,
    first_air_date: Option<String>,
    runtime: Option<i32>,
    #[serde(default)]
    episode_run_time: Vec<i32>,
    original_language: Option<String>,
    #[serde(default)]
    production_countries: Vec<Country>,
    #[serde(default)]
    origin_country: Vec<String>,
    #[serde(default)]
    genres: Vec<Genre>,
    #[serde(default)]
    vote_average: f64,
    poster_path: Option<String>,
    homepage: Option<String>,
    #[serde(default)]
    credits: Credits,
    #[serde(default)]
    videos: Videos,
}

#[derive(Debug, Deserialize)]
struct Country {
    iso_3166_1: String,
}

#[derive(Debug, Deserialize)]
struct Genre {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct Credits {
    #[serde(default)]
    cast: Vec<CastMember>,
    #[serde(default)]
    crew: Vec<CrewMember>,
}

#[derive(Debug, Deserialize)]
struct CastMember {
    name: String,
    character: Option<String>,
    #[serde(default)]
    order: i32,
}

#[derive(Debug, Deserialize)]
struct CrewMember {
    name: String,
    #[serde(default)]
    job: String,
}

#[derive(Debug, Default, Deserialize)]
struct Videos {
    #[serde(default)]
    results: Vec<Video>,
}

#[derive(Debug, Deserialize)]
struct Video {
    site: String,
    key: String,
    #[serde(rename = "type")]
    kind: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Year from a `YYYY-MM-DD` date, ignoring anything at or before 1900
fn year_of(date: Option<&str>) -> Option<i32> {
    let year: i32 = date?.get(..4)?.parse().ok()?;
    (year > 1900).then_some(year)
}

fn poster_url(path: Option<String>) -> Option<String> {
    non_empty(path).map(|p| format!("{}{}", IMAGE_BASE_URL, p))
}

/// Which TMDB catalog a media type lives in. Search and details always use
/// the same one, so a hit's id is valid for the details lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Catalog {
    Movie,
    Tv,
}

impl Catalog {
    fn of(media_type: &str) -> Self {
        match media_type {
            "tv_show" | "anime" => Catalog::Tv,
            _ => Catalog::Movie,
        }
    }
}

/// TMDB catalog for movies and series; disabled without an API key
pub struct TmdbProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl TmdbProvider {
    pub fn new(
        api_key: Option<String>,
        base_url: &str,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| CatalogError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: non_empty(api_key),
        })
    }

    fn search_endpoint(media_type: &str) -> &'static str {
        match Catalog::of(media_type) {
            Catalog::Movie => "/search/movie",
            Catalog::Tv => "/search/tv",
        }
    }

    fn details_endpoint(media_type: &str, external_id: &str) -> String {
        match Catalog::of(media_type) {
            Catalog::Movie => format!("/movie/{}", external_id),
            Catalog::Tv => format!("/tv/{}", external_id),
        }
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CatalogError::ProviderError("tmdb: no API key configured".into()))?;

        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "TMDB request");

        let response = self
            .client
            .get(&url)
            .query(&[("api_key", api_key)])
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound(format!("tmdb {}", path)));
        }
        if !status.is_success() {
            return Err(CatalogError::ProviderError(format!("tmdb HTTP {} for {}", status, path)));
        }
        Ok(response.text().await?)
    }

    fn parse_search(body: &str) -> Result<Vec<SearchCandidate>> {
        let response: SearchResponse = serde_json::from_str(body)?;
        Ok(response
            .results
            .into_iter()
            .map(|item| {
                let year = year_of(
                    non_empty(item.release_date.clone())
                        .or_else(|| item.first_air_date.clone())
                        .as_deref(),
                );
                SearchCandidate {
                    external_id: item.id.to_string(),
                    title: non_empty(item.title).or(item.name).unwrap_or_default(),
                    year,
                    rating: (item.vote_average > 0.0).then_some(item.vote_average),
                    description: non_empty(item.overview),
                    cover_url: poster_url(item.poster_path),
                    relevance: BASE_RELEVANCE,
                }
            })
            .collect())
    }

    fn parse_details(body: &str, external_id: &str) -> Result<ExternalMetadata> {
        let raw: serde_json::Value = serde_json::from_str(body)?;
        let details: DetailsResponse = serde_json::from_value(raw.clone())?;

        let trailer_url = details
            .videos
            .results
            .iter()
            .find(|v| v.site == "YouTube" && v.kind == "Trailer")
            .map(|v| format!("https://www.youtube.com/watch?v={}", v.key));

        let director = details
            .credits
            .crew
            .iter()
            .find(|c| c.job == "Director")
            .map(|c| c.name.clone());

        let mut cast: Vec<Actor> = details
            .credits
            .cast
            .into_iter()
            .map(|c| Actor {
                name: c.name,
                character: non_empty(c.character),
                order: c.order,
            })
            .collect();
        cast.sort_by_key(|a| a.order);
        cast.truncate(MAX_CAST);

        let release_year = year_of(
            non_empty(details.release_date)
                .or(details.first_air_date)
                .as_deref(),
        );

        let country = details
            .production_countries
            .into_iter()
            .map(|c| c.iso_3166_1)
            .next()
            .or_else(|| details.origin_country.into_iter().next());

        let data = ProviderDetails {
            title: non_empty(details.title).or(details.name),
            original_title: non_empty(details.original_title).or(details.original_name),
            overview: non_empty(details.overview),
            genres: details.genres.into_iter().map(|g| g.name).collect(),
            release_year,
            runtime: details
                .runtime
                .filter(|r| *r > 0)
                .or_else(|| details.episode_run_time.first().copied()),
            language: non_empty(details.original_language),
            country,
            director,
            cast,
            raw,
        };

        Ok(ExternalMetadata {
            id: 0,
            media_item_id: 0,
            provider: "tmdb".to_string(),
            external_id: external_id.to_string(),
            data,
            rating: (details.vote_average > 0.0).then_some(details.vote_average),
            review_url: non_empty(details.homepage),
            cover_url: poster_url(details.poster_path),
            trailer_url,
            last_fetched: Utc::now(),
        })
    }
}

#[async_trait]
impl MetadataProvider for TmdbProvider {
    fn name(&self) -> &str {
        "tmdb"
    }

    fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    async fn search(
        &self,
        query: &str,
        media_type: &str,
        year: Option<i32>,
    ) -> Result<Vec<SearchCandidate>> {
        let mut params = vec![("query", query.to_string())];
        if let Some(year) = year {
            params.push(("year", year.to_string()));
        }
        let body = self.get(Self::search_endpoint(media_type), &params).await?;
        Self::parse_search(&body)
    }

    async fn details(&self, external_id: &str, media_type: &str) -> Result<ExternalMetadata> {
        let params = [("append_to_response", "credits,videos,external_ids".to_string())];
        let body = self
            .get(&Self::details_endpoint(media_type, external_id), &params)
            .await?;
        Self::parse_details(&body, external_id)
    }
}
