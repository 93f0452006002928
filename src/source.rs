use std::collections::HashMap;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use color_eyre::{Result, eyre::Context};
use log::debug;
use once_cell::sync::Lazy;
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url, header};
use serde::Deserialize;
use thiserror::Error;

static STORE_URL: Lazy<Url> =
    Lazy::new(|| Url::parse("https://store.steampowered.com/").expect("valid store url"));

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const FREE_LABEL: &str = "Free";

pub type ProductId = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
}

impl Product {
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn store_link(&self) -> Url {
        STORE_URL
            .join(&format!("app/{}", self.id))
            .unwrap_or_else(|_| STORE_URL.clone())
    }
}

/// One price reading for a product. Discount 100 doubles as "free".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub price: u64,
    pub price_formatted: String,
    pub discount_percent: u8,
    pub original_price_formatted: String,
    pub observed_at: NaiveDateTime,
}

impl Observation {
    pub fn free(observed_at: NaiveDateTime) -> Self {
        Self {
            price: 0,
            price_formatted: FREE_LABEL.into(),
            discount_percent: 100,
            original_price_formatted: FREE_LABEL.into(),
            observed_at,
        }
    }

    pub fn is_free(&self) -> bool {
        self.price == 0 && self.discount_percent == 100
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("store answered with status {0}")]
    Status(StatusCode),

    #[error("store reported no data for app {0}")]
    Unsuccessful(ProductId),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Malformed(err.to_string())
    }
}

/// Anything that can produce a fresh [`Observation`] for a product.
///
/// `Ok(None)` means the product exists but carries no price yet
/// (unreleased, delisted), which callers skip.
pub trait PriceSource {
    fn fetch(&self, product: &Product) -> Result<Option<Observation>, FetchError>;
}

#[derive(Deserialize)]
struct AppDetails {
    success: bool,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct AppData {
    #[serde(default)]
    is_free: bool,
    #[serde(default)]
    price_overview: Option<PriceOverview>,
}

#[derive(Deserialize)]
struct PriceOverview {
    #[serde(rename = "final")]
    final_price: u64,
    final_formatted: String,
    #[serde(default)]
    discount_percent: u8,
    #[serde(default)]
    initial_formatted: Option<String>,
}

pub fn parse_app_details(
    id: &str,
    body: &str,
    observed_at: NaiveDateTime,
) -> Result<Option<Observation>, FetchError> {
    let mut apps: HashMap<String, AppDetails> = serde_json::from_str(body)?;
    let details = apps
        .remove(id)
        .filter(|d| d.success)
        .ok_or_else(|| FetchError::Unsuccessful(id.to_owned()))?;
    let data = details
        .data
        .ok_or_else(|| FetchError::Malformed(format!("app {id} has no data block")))?;
    let data: AppData = serde_json::from_value(data)?;

    if data.is_free {
        return Ok(Some(Observation::free(observed_at)));
    }

    Ok(data.price_overview.map(|price| Observation {
        price: price.final_price,
        original_price_formatted: price
            .initial_formatted
            .unwrap_or_else(|| price.final_formatted.clone()),
        price_formatted: price.final_formatted,
        discount_percent: price.discount_percent.min(100),
        observed_at,
    }))
}

/// Client for the storefront's `appdetails` endpoint.
pub struct StoreClient {
    client: Client,
    base: Url,
    region: String,
    language: String,
}

impl StoreClient {
    pub fn new(user_agent: &str, region: &str, language: &str) -> Result<Self> {
        Self::with_base(STORE_URL.clone(), user_agent, region, language)
    }

    pub fn with_base(base: Url, user_agent: &str, region: &str, language: &str) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            format!("{language};q=0.9")
                .parse::<header::HeaderValue>()
                .wrap_err("invalid language for Accept-Language")?,
        );
        let client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .wrap_err("failed to build store client")?;

        Ok(Self {
            client,
            base,
            region: region.to_owned(),
            language: language.to_owned(),
        })
    }

    fn details_url(&self, id: &str) -> Url {
        let mut url = self
            .base
            .join("api/appdetails")
            .unwrap_or_else(|_| self.base.clone());
        url.query_pairs_mut()
            .append_pair("appids", id)
            .append_pair("cc", &self.region)
            .append_pair("l", &self.language);
        url
    }
}

impl PriceSource for StoreClient {
    fn fetch(&self, product: &Product) -> Result<Option<Observation>, FetchError> {
        let url = self.details_url(&product.id);
        debug!("GET {url}");

        let res = self.client.get(url).send()?;
        if !res.status().is_success() {
            return Err(FetchError::Status(res.status()));
        }
        let body = res.text()?;
        parse_app_details(&product.id, &body, Local::now().naive_local())
    }
}
