use axum::{
    Form, Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use handlebars::Handlebars;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::chat::ChatReply;
use crate::config::Config;
use crate::error::SheetError;
use crate::google::GoogleSheetsConnector;
use crate::remote::{Row, TableConnector};
use crate::service::SheetService;
use crate::snapshot::Freshness;

const INDEX_TEMPLATE: &str = "index";
const MISSING_CREDENTIALS: &str =
    "Google Sheets credentials not found or invalid. Place a valid credentials.json in the project root.";

pub struct AppState {
    service: SheetService,
    templates: Handlebars<'static>,
}

impl AppState {
    /// # Errors
    /// * the template error if the index page does not parse
    pub fn new(service: SheetService) -> Result<Self, Box<dyn std::error::Error>> {
        let mut templates = Handlebars::new();
        templates.register_template_string(INDEX_TEMPLATE, include_str!("./static/index.html"))?;
        Ok(AppState { service, templates })
    }

    pub fn service(&self) -> &SheetService {
        &self.service
    }
}

#[derive(Deserialize)]
struct NewRow {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    age: String,
}

#[derive(Deserialize)]
struct TextQuery {
    q: Option<String>,
}

#[derive(Serialize)]
struct IndexPage<'a> {
    headers: &'a [String],
    rows: &'a [Row],
    show_table: bool,
    error_message: Option<String>,
    notice: Option<String>,
}

#[derive(Serialize)]
struct LatestResponse {
    row: Row,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    headers: Row,
    rows: Vec<Row>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Build the router around an already constructed service.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/add", post(add_row))
        .route("/get_latest", get(get_latest))
        .route("/search", get(search_rows))
        .route("/chat", get(chat))
        .nest_service("/static", ServeDir::new("static"))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Connect to the configured Google Sheet and serve until the process exits.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let connector: Arc<dyn TableConnector> = Arc::new(GoogleSheetsConnector::new(
        config.credentials.clone(),
        &config.sheet_id,
        config.remote_timeout,
    )?);
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(SheetService::new(config, connector))?);
    let app = router(state);

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn serve_index(State(state): State<Arc<AppState>>) -> Response {
    render_index(&state, StatusCode::OK, None).await
}

async fn add_row(State(state): State<Arc<AppState>>, Form(row): Form<NewRow>) -> Response {
    match state
        .service
        .queries
        .append(&row.name, &row.email, &row.age)
        .await
    {
        Ok(()) => Redirect::to("/").into_response(),
        Err(e) => render_index(&state, StatusCode::BAD_GATEWAY, Some(format!("Could not add row: {}", e))).await,
    }
}

async fn get_latest(State(state): State<Arc<AppState>>) -> Response {
    let latest = state.service.queries.latest().await;
    let status = status_for(latest.freshness);
    let body = LatestResponse {
        row: latest.row.unwrap_or_default(),
        stale: latest.freshness == Freshness::Stale,
        error: latest.error.as_ref().map(SheetError::to_string),
    };
    (status, Json(body)).into_response()
}

async fn search_rows(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TextQuery>,
) -> Response {
    let service = &state.service;
    let query = params.q.unwrap_or_default();
    let result = service
        .queries
        .search(&query, service.config.max_search_results)
        .await;
    let status = status_for(result.freshness);
    let body = SearchResponse {
        stale: result.freshness == Freshness::Stale,
        error: result.error.as_ref().map(SheetError::to_string),
        headers: result.headers,
        rows: result.rows,
    };
    (status, Json(body)).into_response()
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TextQuery>,
) -> Json<ChatReply> {
    let service = &state.service;
    let message = params.q.unwrap_or_default();
    Json(service.chat.respond(&service.queries, &message).await)
}

fn status_for(freshness: Freshness) -> StatusCode {
    match freshness {
        Freshness::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Freshness::Fresh | Freshness::Stale => StatusCode::OK,
    }
}

async fn render_index(state: &AppState, status: StatusCode, failure: Option<String>) -> Response {
    let config = &state.service.config;
    let view = state.service.queries.visible_rows(config.max_visible_rows).await;

    let mut error_message = failure;
    if error_message.is_none() && view.freshness == Freshness::Unavailable {
        error_message = Some(match &view.error {
            Some(SheetError::Credential(_)) | None => MISSING_CREDENTIALS.to_string(),
            Some(e) => format!("Google Sheet is unreachable: {}", e),
        });
    }
    let notice = (view.freshness == Freshness::Stale)
        .then(|| "Showing cached data; the sheet could not be refreshed.".to_string());

    let (headers, rows) = if config.show_table {
        (view.headers.as_slice(), view.rows.as_slice())
    } else {
        (&[][..], &[][..])
    };
    let page = IndexPage {
        headers,
        rows,
        show_table: config.show_table,
        error_message,
        notice,
    };

    match state.templates.render(INDEX_TEMPLATE, &page) {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            error!("failed to render index page: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
