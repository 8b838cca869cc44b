use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::generator::GeneratorOptions;
use crate::orchestrator::{BatchParams, FailurePolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderCfg{
    pub kind: String, // "mock" | "openai"
    pub api_key_env: String,
    pub base_url: String,
    pub chat_model: String,
    pub bulk_model: String,
    pub image_model: String,
    pub image_size: String,
    pub timeout_secs: u64,
}

impl Default for ProviderCfg {
    fn default() -> Self {
        Self {
            kind: "mock".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            base_url: "https://api.openai.com/v1".into(),
            chat_model: "gpt-4".into(),
            bulk_model: "gpt-3.5-turbo".into(),
            image_model: "dall-e-3".into(),
            image_size: "1024x1024".into(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchCfg{
    pub delay_ms: u64,
    pub failure_policy: FailurePolicy,
    #[serde(flatten)]
    pub generator: GeneratorOptions,
}

impl Default for BatchCfg {
    fn default() -> Self {
        Self { delay_ms: 2000, failure_policy: FailurePolicy::ContinueOnError, generator: GeneratorOptions::default() }
    }
}

impl BatchCfg {
    pub fn params(&self, resume: bool, fail_fast: bool) -> BatchParams {
        BatchParams {
            delay: Duration::from_millis(self.delay_ms),
            policy: if fail_fast { FailurePolicy::FailFast } else { self.failure_policy },
            resume,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind { Json, Postgres }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreCfg{
    pub kind: StoreKind,
    pub json_path: PathBuf,
    pub database_url_env: String,
    pub max_connections: u32,
}

impl Default for StoreCfg {
    fn default() -> Self {
        Self {
            kind: StoreKind::Json,
            json_path: PathBuf::from("data/products.json"),
            database_url_env: "DATABASE_URL".into(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogCfg{
    pub access_key_env: String,
    pub secret_key_env: String,
    pub partner_tag_env: String,
    pub host: String,
    pub region: String,
    pub marketplace: String,
    pub item_count: u32,
}

impl Default for CatalogCfg {
    fn default() -> Self {
        Self {
            access_key_env: "AMAZON_ACCESS_KEY".into(),
            secret_key_env: "AMAZON_SECRET_KEY".into(),
            partner_tag_env: "AMAZON_PARTNER_TAG".into(),
            host: "webservices.amazon.com".into(),
            region: "us-east-1".into(),
            marketplace: "www.amazon.com".into(),
            item_count: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig{
    pub provider: ProviderCfg,
    pub batch: BatchCfg,
    pub store: StoreCfg,
    pub catalog: CatalogCfg,
    pub out_dir: PathBuf,
}

impl AppConfig {
    /// Reads the YAML file, falling back to defaults when it does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        let mut cfg = match tokio::fs::read_to_string(path).await {
            Ok(txt) => serde_yaml::from_str::<AppConfig>(&txt)
                .with_context(|| format!("Failed to parse config YAML: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                AppConfig::default()
            }
            Err(e) => return Err(e).context(format!("Failed to read config file: {}", path.display())),
        };
        if cfg.out_dir.as_os_str().is_empty() {
            cfg.out_dir = PathBuf::from("out");
        }
        Ok(cfg)
    }

    pub fn manifest_path(&self) -> PathBuf { self.out_dir.join("manifest.jsonl") }
}

/// Reads a secret from the environment variable named in the config.
pub fn secret(env_name: &str) -> Result<String> {
    std::env::var(env_name).with_context(|| format!("Environment variable {env_name} not set"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::ParseMode;

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = r#"
provider:
  kind: openai
  chat_model: gpt-4o
batch:
  delay_ms: 1000
  failure_policy: fail_fast
  parse_mode: strict
  parallel_gallery: true
store:
  kind: postgres
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.provider.kind, "openai");
        assert_eq!(cfg.provider.chat_model, "gpt-4o");
        assert_eq!(cfg.provider.image_size, "1024x1024");
        assert_eq!(cfg.batch.failure_policy, FailurePolicy::FailFast);
        assert_eq!(cfg.batch.generator.parse_mode, ParseMode::Strict);
        assert!(cfg.batch.generator.parallel_gallery);
        assert_eq!(cfg.batch.generator.author, "TechReviews.AI");
        assert_eq!(cfg.store.kind, StoreKind::Postgres);
        assert_eq!(cfg.store.max_connections, 5);
        assert_eq!(cfg.catalog.item_count, 10);
    }

    #[test]
    fn fail_fast_flag_overrides_policy() {
        let cfg = BatchCfg::default();
        assert_eq!(cfg.params(false, false).policy, FailurePolicy::ContinueOnError);
        assert_eq!(cfg.params(true, true).policy, FailurePolicy::FailFast);
        assert_eq!(cfg.params(false, false).delay, Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load(&dir.path().join("reviewgen.yaml")).await.unwrap();
        assert_eq!(cfg.provider.kind, "mock");
        assert_eq!(cfg.store.kind, StoreKind::Json);
        assert_eq!(cfg.manifest_path(), PathBuf::from("out/manifest.jsonl"));
    }
}
