use futures_util::future::try_join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::model::{slugify, Category, Product, Status, ValidationError};
use crate::parse::{self, ParseError, ParseMode};
use crate::prompts::{image_prompts, structured_prompt, ProductRequest, ReviewPrompts};
use crate::providers::{CompletionRequest, ImageProvider, ProviderError, TextProvider};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("provider call failed during {stage}: {source}")]
    Provider { stage: &'static str, #[source] source: ProviderError },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("generated record is invalid: {0}")]
    Invalid(#[from] ValidationError),
}

fn provider_err(stage: &'static str) -> impl FnOnce(ProviderError) -> GenerationError {
    move |source| GenerationError::Provider { stage, source }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationJob {
    Review(ProductRequest),
    Structured { category: Category },
}

impl GenerationJob {
    /// Stable per-item label used for logging and the run manifest.
    pub fn label(&self, index: usize) -> String {
        match self {
            GenerationJob::Review(req) => req.product_name.clone(),
            GenerationJob::Structured { category } => format!("{}#{index}", category.slug()),
        }
    }

    /// The slug this job will produce, when it is known before generation.
    pub fn expected_slug(&self) -> Option<String> {
        match self {
            GenerationJob::Review(req) => Some(slugify(&req.product_name)),
            GenerationJob::Structured { .. } => None,
        }
    }
}

/// Raw completions and image URLs, before any parsing.
#[derive(Debug, Clone)]
pub enum RawGeneration {
    Review { review: String, seo: String, pros_cons: String, hero_url: String, gallery: Vec<String> },
    Structured { body: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorOptions {
    pub parse_mode: ParseMode,
    pub parallel_gallery: bool,
    pub author: String,
    pub site_name: String,
    pub review_max_tokens: u32,
    pub aux_max_tokens: u32,
    pub placeholder_image: String,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            parse_mode: ParseMode::Lenient,
            parallel_gallery: false,
            author: "TechReviews.AI".into(),
            site_name: "TechReviews.AI".into(),
            review_max_tokens: 1500,
            aux_max_tokens: 500,
            placeholder_image: "/images/placeholder.jpg".into(),
        }
    }
}

pub struct ContentGenerator {
    text: Arc<dyn TextProvider>,
    images: Arc<dyn ImageProvider>,
    opts: GeneratorOptions,
}

impl ContentGenerator {
    pub fn new(text: Arc<dyn TextProvider>, images: Arc<dyn ImageProvider>, opts: GeneratorOptions) -> Self {
        Self { text, images, opts }
    }

    /// All external calls for one job. Any failure aborts the job.
    pub async fn fetch(&self, job: &GenerationJob) -> Result<RawGeneration, GenerationError> {
        match job {
            GenerationJob::Review(req) => self.fetch_review(req).await,
            GenerationJob::Structured { category } => {
                let req = CompletionRequest::new(structured_prompt(*category), self.opts.review_max_tokens);
                let body = self.text.complete(&req).await.map_err(provider_err("structured"))?;
                Ok(RawGeneration::Structured { body })
            }
        }
    }

    async fn fetch_review(&self, req: &ProductRequest) -> Result<RawGeneration, GenerationError> {
        let prompts = ReviewPrompts::build(req);
        let review = self.complete(&prompts.review, self.opts.review_max_tokens, "review").await?;
        let seo = self.complete(&prompts.seo, self.opts.aux_max_tokens, "seo").await?;
        let pros_cons = self.complete(&prompts.pros_cons, self.opts.aux_max_tokens, "pros_cons").await?;

        let (hero, gallery_prompts) = image_prompts(req);
        let hero_url = self.images.generate(&hero).await.map_err(provider_err("hero_image"))?;
        let gallery = if self.opts.parallel_gallery {
            try_join_all(gallery_prompts.iter().map(|p| self.images.generate(p)))
                .await
                .map_err(provider_err("gallery_image"))?
        } else {
            let mut urls = Vec::with_capacity(gallery_prompts.len());
            for p in &gallery_prompts {
                urls.push(self.images.generate(p).await.map_err(provider_err("gallery_image"))?);
            }
            urls
        };
        tracing::debug!(product = %req.product_name, "fetched 3 completions and {} images", gallery.len() + 1);

        Ok(RawGeneration::Review { review, seo, pros_cons, hero_url, gallery })
    }

    async fn complete(&self, prompt: &str, max_tokens: u32, stage: &'static str) -> Result<String, GenerationError> {
        self.text
            .complete(&CompletionRequest::new(prompt, max_tokens))
            .await
            .map_err(provider_err(stage))
    }

    /// Parses the raw output of [`fetch`](Self::fetch) into a validated record.
    pub fn assemble(&self, job: &GenerationJob, raw: RawGeneration) -> Result<Product, GenerationError> {
        let mode = self.opts.parse_mode;
        let product = match (job, raw) {
            (GenerationJob::Review(req), RawGeneration::Review { review, seo, pros_cons, hero_url, gallery }) => {
                let body = parse::parse_review(&review, mode)?;
                let seo = parse::parse_seo(&seo, mode)?;
                let pc = parse::parse_pros_cons(&pros_cons, mode)?;

                let mut p = Product::new(&req.product_name, req.category, &self.opts.author);
                p.description = body.description;
                p.content = body.content;
                p.price = req.base_price;
                p.image_url = hero_url;
                p.gallery = gallery;
                p.pros = pc.pros;
                p.cons = pc.cons;
                p.specifications = req.specifications.clone();
                p.meta_title = seo.meta_title;
                p.meta_description = seo.meta_description;
                p.keywords = seo.keywords;
                p.tags = vec![req.category.slug().to_string(), "review".into()];
                p.set_status(Status::Published)?;
                p
            }
            (GenerationJob::Structured { category }, RawGeneration::Structured { body }) => {
                let g = parse::parse_structured(&body)?;
                let mut p = Product::new(&g.name, *category, &self.opts.author);
                p.content = if g.features.is_empty() {
                    g.description.clone()
                } else {
                    format!("{}\n\n{}", g.description, g.features.join("\n"))
                };
                p.specifications = g.spec_strings();
                p.price = g.price;
                p.rating = g.rating;
                p.review_count = rand::rng().random_range(50..250);
                p.image_url = self.opts.placeholder_image.clone();
                p.gallery = vec![self.opts.placeholder_image.clone()];
                p.tags = vec![category.as_str().to_lowercase(), "tech".into(), "review".into()];
                p.meta_title = format!("{} Review - {}", g.name.trim(), self.opts.site_name);
                p.meta_description = g.description.clone();
                p.keywords = [category.as_str().to_lowercase(), "review".into(), "tech".into()]
                    .into_iter()
                    .chain(g.pros.iter().cloned())
                    .collect();
                p.description = g.description;
                p.pros = g.pros;
                p.cons = g.cons;
                p.set_status(Status::Published)?;
                p
            }
            _ => {
                return Err(ParseError::Field { field: "kind", reason: "raw output does not match job kind".into() }.into())
            }
        };
        product.validate()?;
        Ok(product)
    }

    #[cfg(test)]
    pub async fn generate(&self, job: &GenerationJob) -> Result<Product, GenerationError> {
        let raw = self.fetch(job).await?;
        self.assemble(job, raw)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::providers::MockProvider;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Text provider that fails every call whose prompt mentions `poison`.
    pub(crate) struct Flaky {
        pub inner: MockProvider,
        pub poison: String,
        pub prompts: Mutex<Vec<String>>,
    }

    impl Flaky {
        pub fn new(poison: &str) -> Self {
            Self { inner: MockProvider::default(), poison: poison.into(), prompts: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl TextProvider for Flaky {
        async fn complete(&self, req: &CompletionRequest) -> Result<String, ProviderError> {
            self.prompts.lock().push(req.prompt.clone());
            if req.prompt.contains(&self.poison) {
                return Err(ProviderError::RateLimited);
            }
            self.inner.complete(req).await
        }
        fn name(&self) -> &'static str { "flaky" }
    }

    pub(crate) fn request(name: &str, category: Category, price: f64) -> ProductRequest {
        ProductRequest {
            category,
            product_name: name.into(),
            base_price: price,
            specifications: [("Weight".to_string(), "1.2kg".to_string())].into_iter().collect(),
        }
    }

    fn mock_generator(opts: GeneratorOptions) -> (Arc<MockProvider>, ContentGenerator) {
        let mock = Arc::new(MockProvider::default());
        let gen = ContentGenerator::new(mock.clone(), mock.clone(), opts);
        (mock, gen)
    }

    #[tokio::test]
    async fn review_job_makes_seven_calls_and_fills_record() {
        let (mock, gen) = mock_generator(GeneratorOptions::default());
        let job = GenerationJob::Review(request("Steam Deck OLED", Category::Gaming, 549.0));
        let p = gen.generate(&job).await.unwrap();

        assert_eq!(mock.calls(), 7);
        assert_eq!(p.slug, "steam-deck-oled");
        assert_eq!(p.description, "Steam Deck OLED is a capable device.");
        assert_eq!(p.meta_title, "Steam Deck OLED Review");
        assert_eq!(p.pros, vec!["Strong performance", "Good battery life"]);
        assert_eq!(p.cons, vec!["Pricey"]);
        assert_eq!(p.gallery.len(), 3);
        assert_eq!(p.price, 549.0);
        assert_eq!(p.status, Status::Published);
        assert_eq!(p.specifications["Weight"], "1.2kg");
    }

    #[tokio::test]
    async fn parallel_gallery_yields_same_shape() {
        let (mock, gen) = mock_generator(GeneratorOptions { parallel_gallery: true, ..Default::default() });
        let job = GenerationJob::Review(request("Kindle Scribe", Category::SmartHome, 339.0));
        let p = gen.generate(&job).await.unwrap();
        assert_eq!(p.gallery.len(), 3);
        assert_eq!(mock.calls(), 7);
    }

    #[tokio::test]
    async fn structured_job_uses_payload() {
        let (mock, gen) = mock_generator(GeneratorOptions::default());
        let p = gen.generate(&GenerationJob::Structured { category: Category::Laptops }).await.unwrap();
        assert_eq!(mock.calls(), 1);
        assert_eq!(p.title, "Mock Gadget 1");
        assert_eq!(p.rating, 4.2);
        assert!((50..250).contains(&p.review_count));
        assert_eq!(p.tags, vec!["laptops", "tech", "review"]);
        assert_eq!(p.meta_title, "Mock Gadget 1 Review - TechReviews.AI");
        assert_eq!(p.keywords, vec!["laptops", "review", "tech", "Great value", "Solid build"]);
        assert_eq!(p.content, "A dependable gadget built for everyday use.\n\nLong battery life\nFast charging");
    }

    #[tokio::test]
    async fn provider_failure_aborts_job() {
        let flaky = Arc::new(Flaky::new("SEO metadata"));
        let gen = ContentGenerator::new(flaky.clone(), Arc::new(MockProvider::default()), GeneratorOptions::default());
        let job = GenerationJob::Review(request("Pixel 9", Category::Smartphones, 799.0));
        let err = gen.generate(&job).await.unwrap_err();
        assert!(matches!(err, GenerationError::Provider { stage: "seo", .. }));
        // review then seo; pros/cons never attempted
        assert_eq!(flaky.prompts.lock().len(), 2);
    }

    #[test]
    fn mismatched_raw_is_rejected() {
        let (_, gen) = mock_generator(GeneratorOptions::default());
        let job = GenerationJob::Structured { category: Category::Gaming };
        let raw = RawGeneration::Review {
            review: String::new(),
            seo: String::new(),
            pros_cons: String::new(),
            hero_url: String::new(),
            gallery: vec![],
        };
        assert!(matches!(gen.assemble(&job, raw), Err(GenerationError::Parse(_))));
    }
}
