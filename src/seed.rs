//! Deterministic placeholder catalog for working on the site without any provider.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;

use crate::model::{Category, Product, Status};
use crate::store::{ProductStore, StoreError};

const BRANDS: [&str; 8] = ["Apple", "Samsung", "Sony", "Microsoft", "Google", "Asus", "Lenovo", "Dell"];
const FEATURES: [&str; 8] = [
    "High performance",
    "Long battery life",
    "Premium build quality",
    "Great value for money",
    "Advanced features",
    "User friendly interface",
    "Innovative design",
    "Excellent connectivity",
];
const PLACEHOLDER: &str = "/images/placeholder.jpg";

/// Seed record `index`, published `index` days before `now`. Every third one is discounted.
pub fn seed_product(index: usize, now: DateTime<Utc>) -> Product {
    let category = Category::ALL[index % Category::ALL.len()];
    let brand = BRANDS[index % BRANDS.len()];
    let model = format!("Pro {}", 2024 + index % 3);
    let title = format!("{brand} {} {model}", category.as_str());
    let lower = category.as_str().to_lowercase();

    let mut p = Product::new(&title, category, "Tech Editor");
    p.description = format!(
        "Experience the next level of {lower} with the {title}. This premium device offers exceptional performance and innovative features."
    );
    p.content = format!("Detailed review of the {title}. This product represents the pinnacle of {lower} technology.");
    p.price = 499.99 + index as f64 * 100.0;
    p.rating = 4.0 + (index * 37 % 100) as f64 / 100.0;
    p.review_count = 50 + (index * 53 % 150) as u32;
    p.image_url = PLACEHOLDER.into();
    p.gallery = vec![PLACEHOLDER.into()];
    p.pros = (0..3).map(|k| FEATURES[(index + k) % FEATURES.len()].to_string()).collect();
    p.cons = vec!["Premium price point".into(), "Limited availability".into()];
    p.specifications = [("brand", brand.to_string()), ("model", model), ("warranty", "1 year".to_string())]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    p.tags = vec![lower.clone(), brand.to_lowercase(), "tech".into(), "review".into()];
    p.meta_title = format!("{title} Review - TechReviews.AI");
    p.meta_description =
        format!("Comprehensive review of the {title}. Find out if this {lower} device is worth your investment.");
    p.keywords = vec![lower, brand.to_lowercase(), "review".into(), "tech".into()];
    p.publish_date = now - Duration::days(index as i64);
    p.last_updated = now;
    p.status = Status::Published;
    if index % 3 == 0 {
        p.discount = Some(10.0);
    }
    p
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SeedReport {
    pub saved: Vec<String>,
    pub skipped: Vec<String>,
}

/// Writes `count` seed records, oldest first so the store ends up newest first.
/// Titles repeat after 24 records; repeats and already stored slugs are skipped.
pub async fn seed_store(store: &dyn ProductStore, count: usize, now: DateTime<Utc>) -> Result<SeedReport, StoreError> {
    let mut report = SeedReport::default();
    let mut seen = HashSet::new();
    let mut batch = Vec::with_capacity(count);
    for index in 0..count {
        let product = seed_product(index, now);
        if seen.insert(product.slug.clone()) {
            batch.push(product);
        } else {
            report.skipped.push(product.slug);
        }
    }

    for product in batch.into_iter().rev() {
        match store.insert(&product).await {
            Ok(()) => report.saved.push(product.slug),
            Err(StoreError::DuplicateSlug(slug)) => {
                tracing::debug!(%slug, "seed product already stored");
                report.skipped.push(slug);
            }
            Err(e) => return Err(e),
        }
    }
    tracing::info!(saved = report.saved.len(), skipped = report.skipped.len(), store = store.name(), "seed data written");
    Ok(report)
}
