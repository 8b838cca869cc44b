use std::{collections::BTreeMap, path::PathBuf, sync::Arc};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{sse::{Event, Sse}, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::events::RunEvent;
use crate::generator::{ContentGenerator, GenerationJob};
use crate::listing::{self, ListingQuery, Page, PriceRange, SortKey, DEFAULT_PAGE_SIZE};
use crate::manifest::ManifestWriter;
use crate::model::Product;
use crate::orchestrator::{BatchDriver, BatchParams};
use crate::prompts::ProductRequest;
use crate::store::ProductStore;

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn ProductStore>,
    generator: Arc<ContentGenerator>,
    params: BatchParams,
    manifest_path: PathBuf,
    current_run: Arc<Mutex<Option<String>>>,
    events_tx: broadcast::Sender<RunEvent>,
}

impl AppState {
    pub fn new(store: Arc<dyn ProductStore>, generator: Arc<ContentGenerator>, params: BatchParams, manifest_path: PathBuf) -> Self {
        let (tx, _rx) = broadcast::channel::<RunEvent>(256);
        Self { store, generator, params, manifest_path, current_run: Arc::new(Mutex::new(None)), events_tx: tx }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/products", get(list_products))
        .route("/api/products/{slug}", get(get_product))
        .route("/api/categories", get(categories))
        .route("/api/run", post(start_run))
        .route("/api/run/current", get(get_current_run))
        .route("/api/run/{id}/events", get(run_events))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(bind: String, state: AppState) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("reviewgen API listening on http://{bind}");
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    category: Option<String>,
    price: Option<PriceRange>,
    deals: Option<bool>,
    q: Option<String>,
    sort: Option<SortKey>,
    page: Option<usize>,
    page_size: Option<usize>,
}

impl TryFrom<ListParams> for ListingQuery {
    type Error = ApiErr;

    fn try_from(p: ListParams) -> Result<Self, Self::Error> {
        let category = match p.category.as_deref() {
            Some(c) => c.parse::<listing::CategoryFilter>().map_err(|e| ApiErr::bad_request(e.to_string()))?,
            None => listing::CategoryFilter::All,
        };
        Ok(ListingQuery {
            category,
            price: p.price.unwrap_or_default(),
            deals_only: p.deals.unwrap_or(false),
            search: p.q,
            sort: p.sort.unwrap_or_default(),
            page: p.page.unwrap_or(1),
            page_size: p.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 100),
        })
    }
}

async fn list_products(State(st): State<AppState>, Query(params): Query<ListParams>) -> Result<Json<Page<Product>>, ApiErr> {
    let query = ListingQuery::try_from(params)?;
    let products = st.store.list().await?;
    let page = listing::list(&products, &query);
    Ok(Json(Page {
        items: page.items.into_iter().cloned().collect(),
        page: page.page,
        page_size: page.page_size,
        total_items: page.total_items,
        total_pages: page.total_pages,
    }))
}

async fn get_product(State(st): State<AppState>, Path(slug): Path<String>) -> Result<Json<Product>, ApiErr> {
    st.store
        .list()
        .await?
        .into_iter()
        .find(|p| p.slug == slug)
        .map(Json)
        .ok_or_else(|| ApiErr::not_found(format!("No product with slug {slug}")))
}

async fn categories(State(st): State<AppState>) -> Result<Json<BTreeMap<String, usize>>, ApiErr> {
    let products = st.store.list().await?;
    let counts = listing::category_counts(&products)
        .into_iter()
        .map(|(c, n)| (c.as_str().to_string(), n))
        .collect();
    Ok(Json(counts))
}

#[derive(Debug, Serialize)]
struct StartRunResp { run_id: String }

async fn start_run(State(st): State<AppState>, Json(requests): Json<Vec<ProductRequest>>) -> Result<Json<StartRunResp>, ApiErr> {
    if requests.is_empty() {
        return Err(ApiErr::bad_request("At least one product request is required"));
    }
    let jobs: Vec<GenerationJob> = requests.into_iter().map(GenerationJob::Review).collect();

    // Everything fallible happens before the run slot is claimed.
    let manifest = ManifestWriter::open(st.manifest_path.clone()).await?;

    // Check-and-set under one lock so two requests cannot both start a run.
    let run_id = {
        let mut current = st.current_run.lock().await;
        if let Some(existing_id) = &*current {
            return Err(ApiErr::run_already_active(existing_id));
        }
        let run_id = format!("run-{}", Uuid::new_v4());
        *current = Some(run_id.clone());
        run_id
    };

    let driver = BatchDriver::new(st.generator.clone(), st.store.clone(), st.params.clone())
        .with_manifest(manifest)
        .with_events(st.events_tx.clone());
    let tx = st.events_tx.clone();
    let current_run_ref = st.current_run.clone();

    // brief delay lets the SSE subscriber connect
    let spawn_run_id = run_id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        let result = driver.run(&spawn_run_id, &jobs).await;

        *current_run_ref.lock().await = None;

        if let Err(e) = result {
            tracing::error!("run error: {e:#}");
            let _ = tx.send(RunEvent::Failed { run_id: spawn_run_id, error: e.to_string() });
        }
    });

    Ok(Json(StartRunResp { run_id }))
}

#[derive(Serialize)]
struct CurrentRunResp { run_id: Option<String> }

async fn get_current_run(State(st): State<AppState>) -> Json<CurrentRunResp> {
    let current = st.current_run.lock().await;
    Json(CurrentRunResp { run_id: current.clone() })
}

pub async fn run_events(
    State(st): State<AppState>,
    Path(run_id): Path<String>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, axum::Error>>> {
    let rx = st.events_tx.subscribe();

    let stream = BroadcastStream::new(rx)
        .filter_map(|msg| async move { msg.ok() })
        .filter(move |evt: &RunEvent| futures_util::future::ready(evt.run_id() == run_id))
        .map(|evt| Event::default().event("message").json_data(&evt));

    Sse::new(stream)
}

#[derive(Debug)]
pub struct ApiErr {
    status: StatusCode,
    code: String,
    message: String,
    suggestion: Option<String>,
}

impl ApiErr {
    fn internal(e: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal_error".to_string(),
            message: format!("Internal error: {}", e),
            suggestion: None,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request".to_string(),
            message: message.into(),
            suggestion: None,
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found".to_string(),
            message: message.into(),
            suggestion: None,
        }
    }

    fn run_already_active(run_id: &str) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code: "run_already_active".to_string(),
            message: format!("A run is already in progress: {}", run_id),
            suggestion: Some("Wait for the current run to complete, or follow its events stream.".to_string()),
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiErr {
    fn from(e: E) -> Self {
        Self::internal(e.into())
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> axum::response::Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            code: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            suggestion: Option<String>,
        }
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
                code: self.code,
                suggestion: self.suggestion,
            }),
        )
            .into_response()
    }
}
