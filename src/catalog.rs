//! Product Advertising API 5.0 `SearchItems` client and the keyword sync job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

use crate::model::{Category, Product};
use crate::providers::extract_api_error;
use crate::store::{ProductStore, StoreError};

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "ProductAdvertisingAPI";
const TARGET: &str = "com.amazon.paapi5.v1.ProductAdvertisingAPIv1.SearchItems";
const SEARCH_PATH: &str = "/paapi5/searchitems";
const RESOURCES: [&str; 5] = [
    "ItemInfo.Title",
    "Offers.Listings.Price",
    "Images.Primary.Large",
    "ItemInfo.Features",
    "ItemInfo.ProductInfo",
];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog http error: {0}")]
    Http(String),
    #[error("catalog rejected request ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("malformed catalog response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for CatalogError {
    fn from(e: reqwest::Error) -> Self { CatalogError::Http(e.to_string()) }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub asin: String,
    pub detail_page_url: String,
    pub title: String,
    pub price: Option<f64>,
    pub image_url: Option<String>,
    pub features: Vec<String>,
}

impl CatalogItem {
    pub fn into_product(self, category: Category) -> Product {
        let mut p = Product::new(&self.title, category, "Catalog Sync");
        let description = self.features.join("\n");
        p.meta_title = p.title.clone();
        p.meta_description = description.chars().take(160).collect();
        p.content = description.clone();
        p.description = description;
        p.price = self.price.unwrap_or(0.0);
        if let Some(url) = self.image_url {
            p.gallery = vec![url.clone()];
            p.image_url = url;
        }
        p.tags = vec![category.slug().to_string()];
        if !self.detail_page_url.is_empty() {
            p.amazon_url = Some(self.detail_page_url.clone());
            p.affiliate_links.insert("amazon".into(), self.detail_page_url);
        }
        p.asin = Some(self.asin);
        p
    }
}

#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn search_items(&self, keywords: &str, count: u32) -> Result<Vec<CatalogItem>, CatalogError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaapiCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub partner_tag: String,
}

pub struct PaapiClient {
    http: reqwest::Client,
    creds: PaapiCredentials,
    host: String,
    region: String,
    marketplace: String,
}

impl PaapiClient {
    pub fn new(creds: PaapiCredentials, host: String, region: String, marketplace: String, timeout: Duration) -> Result<Self, CatalogError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, creds, host, region, marketplace })
    }

    fn search_body(&self, keywords: &str, count: u32) -> String {
        serde_json::json!({
            "Keywords": keywords,
            "SearchIndex": "All",
            "ItemCount": count.clamp(1, 10),
            "Resources": RESOURCES,
            "PartnerTag": self.creds.partner_tag,
            "PartnerType": "Associates",
            "Marketplace": self.marketplace,
        })
        .to_string()
    }
}

#[async_trait]
impl CatalogClient for PaapiClient {
    async fn search_items(&self, keywords: &str, count: u32) -> Result<Vec<CatalogItem>, CatalogError> {
        let body = self.search_body(keywords, count);
        let signed = sign_request(&self.creds, &self.host, &self.region, SEARCH_PATH, TARGET, &body, Utc::now());

        let resp = self
            .http
            .post(format!("https://{}{}", self.host, SEARCH_PATH))
            .header("content-encoding", "amz-1.0")
            .header("content-type", "application/json; charset=utf-8")
            .header("x-amz-date", &signed.amz_date)
            .header("x-amz-target", TARGET)
            .header("authorization", &signed.authorization)
            .body(body)
            .send()
            .await?;
        let status = resp.status();
        let payload = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(CatalogError::Api { status: status.as_u16(), message: extract_paapi_error(&payload) });
        }
        parse_search_response(&payload)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignedHeaders {
    pub amz_date: String,
    pub authorization: String,
}

fn hmac(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts keys of any length");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

fn signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{secret_key}").as_bytes(), date);
    let k_region = hmac(&k_date, region);
    let k_service = hmac(&k_region, service);
    hmac(&k_service, "aws4_request")
}

/// AWS Signature Version 4 for a PA-API POST.
pub fn sign_request(
    creds: &PaapiCredentials,
    host: &str,
    region: &str,
    path: &str,
    target: &str,
    body: &str,
    now: DateTime<Utc>,
) -> SignedHeaders {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let canonical_headers = format!(
        "content-encoding:amz-1.0\ncontent-type:application/json; charset=utf-8\nhost:{host}\nx-amz-date:{amz_date}\nx-amz-target:{target}\n"
    );
    let signed_headers = "content-encoding;content-type;host;x-amz-date;x-amz-target";
    let canonical_request = format!("POST\n{path}\n\n{canonical_headers}\n{signed_headers}\n{}", sha256_hex(body));

    let scope = format!("{date}/{region}/{SERVICE}/aws4_request");
    let string_to_sign = format!("AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}", sha256_hex(&canonical_request));

    let signature = hex::encode(hmac(&signing_key(&creds.secret_key, &date, region, SERVICE), &string_to_sign));

    SignedHeaders {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            creds.access_key
        ),
        amz_date,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SearchResponse {
    items_result: Option<ItemsResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsResult {
    #[serde(default)]
    items: Vec<RawItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawItem {
    #[serde(rename = "ASIN")]
    asin: String,
    #[serde(rename = "DetailPageURL", default)]
    detail_page_url: String,
    item_info: Option<ItemInfo>,
    offers: Option<Offers>,
    images: Option<Images>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemInfo {
    title: Option<DisplayValue>,
    features: Option<DisplayValues>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DisplayValue { display_value: String }

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DisplayValues { #[serde(default)] display_values: Vec<String> }

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Offers { #[serde(default)] listings: Vec<Listing> }

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Listing { price: Option<Price> }

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Price { amount: f64 }

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Images { primary: Option<ImageSizes> }

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageSizes { large: Option<ImageRef> }

#[derive(Deserialize)]
struct ImageRef { #[serde(rename = "URL")] url: String }

pub fn parse_search_response(payload: &str) -> Result<Vec<CatalogItem>, CatalogError> {
    let resp: SearchResponse = serde_json::from_str(payload).map_err(|e| CatalogError::Malformed(e.to_string()))?;
    let items = resp.items_result.map(|r| r.items).unwrap_or_default();
    Ok(items
        .into_iter()
        .filter_map(|it| {
            let info = it.item_info;
            let title = info.as_ref().and_then(|i| i.title.as_ref()).map(|t| t.display_value.trim().to_string())?;
            if title.is_empty() {
                return None;
            }
            Some(CatalogItem {
                asin: it.asin,
                detail_page_url: it.detail_page_url,
                title,
                price: it.offers.and_then(|o| o.listings.into_iter().next()).and_then(|l| l.price).map(|p| p.amount),
                image_url: it.images.and_then(|i| i.primary).and_then(|p| p.large).map(|l| l.url),
                features: info.and_then(|i| i.features).map(|f| f.display_values).unwrap_or_default(),
            })
        })
        .collect())
}

fn extract_paapi_error(body: &str) -> String {
    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct Envelope { #[serde(default)] errors: Vec<PaapiError> }
    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct PaapiError { code: Option<String>, message: Option<String> }

    match serde_json::from_str::<Envelope>(body) {
        Ok(env) if !env.errors.is_empty() => env
            .errors
            .into_iter()
            .map(|e| format!("{}: {}", e.code.unwrap_or_default(), e.message.unwrap_or_default()))
            .collect::<Vec<_>>()
            .join("; "),
        _ => extract_api_error(body),
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncReport {
    pub saved: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Searches each keyword in turn and stores every new item as a draft product.
pub async fn sync_keywords(
    client: &dyn CatalogClient,
    store: &dyn ProductStore,
    keywords: &[String],
    category: Category,
    count: u32,
) -> SyncReport {
    let mut report = SyncReport::default();
    for kw in keywords {
        let items = match client.search_items(kw, count).await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(keyword = %kw, error = %e, "catalog search failed");
                report.failed.push((kw.clone(), e.to_string()));
                continue;
            }
        };
        tracing::info!(keyword = %kw, found = items.len(), "catalog search returned");

        for item in items {
            let product = item.into_product(category);
            match store.insert(&product).await {
                Ok(()) => report.saved.push(product.slug),
                Err(StoreError::DuplicateSlug(slug)) => report.skipped.push(slug),
                Err(e) => {
                    tracing::error!(slug = %product.slug, error = %e, "could not save catalog item");
                    report.failed.push((product.slug, e.to_string()));
                }
            }
        }
    }
    report
}
