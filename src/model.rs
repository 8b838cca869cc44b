use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Gaming,
    Laptops,
    Smartphones,
    #[serde(rename = "Smart Home")]
    SmartHome,
}

impl Category {
    pub const ALL: [Category; 4] = [Category::Gaming, Category::Laptops, Category::Smartphones, Category::SmartHome];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Gaming => "Gaming",
            Category::Laptops => "Laptops",
            Category::Smartphones => "Smartphones",
            Category::SmartHome => "Smart Home",
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            Category::Gaming => "gaming",
            Category::Laptops => "laptops",
            Category::Smartphones => "smartphones",
            Category::SmartHome => "smart-home",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Category {
    type Err = ValidationError;

    /// Accepts the display name or the URL slug, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = slugify(s);
        Category::ALL
            .into_iter()
            .find(|c| c.slug() == wanted)
            .ok_or_else(|| ValidationError::UnknownCategory(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Draft,
    Published,
    Archived,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Draft => "draft",
            Status::Published => "published",
            Status::Archived => "archived",
        }
    }

    /// Lifecycle only moves forward: draft -> published -> archived.
    pub fn can_transition_to(&self, next: Status) -> bool { next >= *self }
}

impl FromStr for Status {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(Status::Draft),
            "published" => Ok(Status::Published),
            "archived" => Ok(Status::Archived),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub content: String,
    pub category: Category,
    #[serde(default)]
    pub tags: Vec<String>,

    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_sale: Option<bool>,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub review_count: u32,

    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub gallery: Vec<String>,

    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    #[serde(default)]
    pub specifications: BTreeMap<String, String>,

    #[serde(default)]
    pub meta_title: String,
    #[serde(default)]
    pub meta_description: String,
    #[serde(default)]
    pub keywords: Vec<String>,

    pub author: String,
    pub publish_date: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub status: Status,

    #[serde(default)]
    pub affiliate_links: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amazon_url: Option<String>,
    /// Site path of the product page, `/product/{slug}`.
    #[serde(default)]
    pub page_link: String,

    /// Fields this crate does not model, kept so rewriting the document loses nothing.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Product {
    /// A fresh record with identity and lifecycle fields filled in; everything
    /// descriptive is left empty for the caller.
    pub fn new(title: &str, category: Category, author: &str) -> Self {
        let now = Utc::now();
        let slug = slugify(title);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.trim().to_string(),
            page_link: page_link(&slug),
            slug,
            description: String::new(),
            content: String::new(),
            category,
            tags: Vec::new(),
            price: 0.0,
            discount: None,
            on_sale: None,
            rating: 0.0,
            review_count: 0,
            image_url: String::new(),
            gallery: Vec::new(),
            pros: Vec::new(),
            cons: Vec::new(),
            specifications: BTreeMap::new(),
            meta_title: String::new(),
            meta_description: String::new(),
            keywords: Vec::new(),
            author: author.to_string(),
            publish_date: now,
            last_updated: now,
            status: Status::Draft,
            affiliate_links: BTreeMap::new(),
            asin: None,
            amazon_url: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Moves the record along its lifecycle; going backwards is rejected.
    pub fn set_status(&mut self, next: Status) -> Result<(), ValidationError> {
        if !self.status.can_transition_to(next) {
            return Err(ValidationError::StatusTransition { from: self.status, to: next });
        }
        self.status = next;
        Ok(())
    }

    pub fn is_deal(&self) -> bool {
        self.on_sale.unwrap_or(false) || self.discount.is_some()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if self.slug.is_empty() {
            return Err(ValidationError::EmptySlug);
        }
        let expected = slugify(&self.title);
        if self.slug != expected {
            return Err(ValidationError::SlugMismatch { slug: self.slug.clone(), expected });
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(ValidationError::Price(self.price));
        }
        if !(0.0..=5.0).contains(&self.rating) {
            return Err(ValidationError::Rating(self.rating));
        }
        if let Some(d) = self.discount {
            if !(0.0..=100.0).contains(&d) {
                return Err(ValidationError::Discount(d));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("title is empty")]
    EmptyTitle,
    #[error("slug is empty")]
    EmptySlug,
    #[error("slug {slug:?} does not match title (expected {expected:?})")]
    SlugMismatch { slug: String, expected: String },
    #[error("price must be a non-negative number, got {0}")]
    Price(f64),
    #[error("rating must be within 0..=5, got {0}")]
    Rating(f64),
    #[error("discount must be within 0..=100, got {0}")]
    Discount(f64),
    #[error("unknown category {0:?}")]
    UnknownCategory(String),
    #[error("unknown status {0:?}")]
    UnknownStatus(String),
    #[error("status cannot go from {} back to {}", from.as_str(), to.as_str())]
    StatusTransition { from: Status, to: Status },
}

pub fn page_link(slug: &str) -> String {
    format!("/product/{slug}")
}

/// Lowercase, with every run of non-alphanumeric characters collapsed to a single hyphen.
pub fn slugify(title: &str) -> String {
    slug::slugify(title)
}
