use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::io::write_atomic;
use crate::model::{page_link, Product, ValidationError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a product with slug {0:?} already exists")]
    DuplicateSlug(String),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("store revision changed underneath us (expected {expected}, found {found})")]
    Conflict { expected: u64, found: u64 },
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn insert(&self, product: &Product) -> Result<(), StoreError>;
    async fn contains_slug(&self, slug: &str) -> Result<bool, StoreError>;
    /// Newest first.
    async fn list(&self) -> Result<Vec<Product>, StoreError>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ProductDocument {
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A single JSON document holding every product.
///
/// All writes in this process funnel through one lock; the document's
/// `revision` is re-read right before each write so a second process writing
/// the same file surfaces as [`StoreError::Conflict`] instead of a lost update.
pub struct JsonStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), writer: Mutex::new(()) }
    }

    pub async fn load(&self) -> Result<ProductDocument, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ProductDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, doc: &ProductDocument, expected: u64) -> Result<(), StoreError> {
        let found = self.load().await?.revision;
        if found != expected {
            return Err(StoreError::Conflict { expected, found });
        }
        let bytes = serde_json::to_vec_pretty(doc)?;
        write_atomic(&self.path, &bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl ProductStore for JsonStore {
    async fn insert(&self, product: &Product) -> Result<(), StoreError> {
        product.validate()?;
        let _guard = self.writer.lock().await;

        let mut doc = self.load().await?;
        if doc.products.iter().any(|p| p.slug == product.slug) {
            return Err(StoreError::DuplicateSlug(product.slug.clone()));
        }
        let expected = doc.revision;
        let mut product = product.clone();
        if product.page_link.is_empty() {
            product.page_link = page_link(&product.slug);
        }
        doc.products.insert(0, product);
        doc.revision += 1;
        self.save(&doc, expected).await?;
        tracing::debug!(slug = %doc.products[0].slug, revision = doc.revision, path = %self.path.display(), "product written");
        Ok(())
    }

    async fn contains_slug(&self, slug: &str) -> Result<bool, StoreError> {
        Ok(self.load().await?.products.iter().any(|p| p.slug == slug))
    }

    async fn list(&self) -> Result<Vec<Product>, StoreError> {
        Ok(self.load().await?.products)
    }

    fn name(&self) -> &'static str { "json" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Category;
    use std::sync::Arc;

    fn product(title: &str) -> Product {
        Product::new(title, Category::Gaming, "tester")
    }

    #[tokio::test]
    async fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("data/products.json"));
        assert!(store.list().await.unwrap().is_empty());
        assert!(!store.contains_slug("anything").await.unwrap());
    }

    #[tokio::test]
    async fn insert_prepends_and_bumps_revision() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("products.json"));
        store.insert(&product("Xbox Series X")).await.unwrap();
        store.insert(&product("PlayStation 5")).await.unwrap();

        let doc = store.load().await.unwrap();
        assert_eq!(doc.revision, 2);
        let slugs: Vec<_> = doc.products.iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(slugs, vec!["playstation-5", "xbox-series-x"]);
        assert!(store.contains_slug("xbox-series-x").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_slug_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("products.json"));
        store.insert(&product("Nintendo Switch")).await.unwrap();
        let err = store.insert(&product("nintendo   switch!")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSlug(s) if s == "nintendo-switch"));
    }

    #[tokio::test]
    async fn invalid_record_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("products.json"));
        let mut p = product("Broken");
        p.rating = 9.0;
        assert!(matches!(store.insert(&p).await, Err(StoreError::Invalid(_))));
    }

    #[tokio::test]
    async fn concurrent_inserts_do_not_lose_updates() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonStore::new(dir.path().join("products.json")));
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.insert(&product(&format!("Gadget {i}"))).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        let doc = store.load().await.unwrap();
        assert_eq!(doc.products.len(), 8);
        assert_eq!(doc.revision, 8);
    }

    #[tokio::test]
    async fn foreign_writer_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.json");
        let store = JsonStore::new(&path);
        store.insert(&product("Meta Quest 3")).await.unwrap();

        let doc = store.load().await.unwrap();
        // another process rewrote the file in the meantime
        let bumped = ProductDocument { revision: 5, products: doc.products.clone(), ..Default::default() };
        tokio::fs::write(&path, serde_json::to_vec(&bumped).unwrap()).await.unwrap();

        let err = store.save(&doc, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 1, found: 5 }));
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();
        let store = JsonStore::new(&path);
        assert!(matches!(store.list().await, Err(StoreError::Json(_))));
    }

    #[tokio::test]
    async fn reads_legacy_document_without_revision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.json");
        let legacy = r#"{"products":[{"_id":"product_1","title":"Echo Dot","slug":"echo-dot","description":"d","content":"c",
            "category":"Smart Home","price":49.99,"rating":4.5,"reviewCount":120,"author":"AI Editor",
            "publishDate":"2024-01-10T00:00:00Z","lastUpdated":"2024-01-10T00:00:00Z","status":"published",
            "affiliateLinks":{"amazon":"https://amazon.com/dp/x"}}]}"#;
        tokio::fs::write(&path, legacy).await.unwrap();
        let products = JsonStore::new(&path).list().await.unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].category, Category::SmartHome);
        assert_eq!(products[0].affiliate_links["amazon"], "https://amazon.com/dp/x");
    }

    #[tokio::test]
    async fn insert_keeps_fields_of_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.json");
        let legacy = r#"{"exportedBy":"admin","products":[{"_id":"product_1","title":"Echo Dot","slug":"echo-dot",
            "description":"d","content":"c","category":"Smart Home","price":49.99,"rating":4.5,"reviewCount":120,
            "author":"AI Editor","publishDate":"2024-01-10T00:00:00Z","lastUpdated":"2024-01-10T00:00:00Z",
            "status":"published","pageLink":"/product/echo-dot","amazonUrl":"https://amazon.com/x",
            "featured":true,"badges":["editor-pick"]}]}"#;
        tokio::fs::write(&path, legacy).await.unwrap();

        let store = JsonStore::new(&path);
        store.insert(&product("Pixel 9")).await.unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(raw["exportedBy"], "admin");
        let products = raw["products"].as_array().unwrap();
        assert_eq!(products.len(), 2);
        assert_eq!(products[0]["pageLink"], "/product/pixel-9");

        let old = &products[1];
        assert_eq!(old["pageLink"], "/product/echo-dot");
        assert_eq!(old["amazonUrl"], "https://amazon.com/x");
        assert_eq!(old["featured"], true);
        assert_eq!(old["badges"][0], "editor-pick");
        assert_eq!(old["reviewCount"], 120);
    }
}
