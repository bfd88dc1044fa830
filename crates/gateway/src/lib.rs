//! HTTP gateway for redline.
//!
//! Serves the agent beacon endpoint (`POST /beacon`), a health check, and
//! the JSON operator API nested under `/api`.
//!
//! Built on Axum. Every service the handlers need is assembled once in
//! [`GatewayState::new`] and shared through an `Arc`.

pub mod api;
pub mod beacon;

pub use beacon::HttpContact;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{Method, header},
    response::Json,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use redline_channels::{ContactRegistry, ContactService, ResultProcessor};
use redline_config::AppConfig;
use redline_core::error::{LearningError, StoreError};
use redline_core::{DataStore, EventBus, ResultStore};
use redline_learning::{ParserRegistry, PatternLearner};
use redline_security::{BeaconReport, TracingSink};
use redline_store::{FileResultStore, InMemoryStore};
use redline_workflow::{OperationRunner, Watchdog};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: AppConfig,
    pub store: Arc<dyn DataStore>,
    pub results: Arc<dyn ResultStore>,
    pub events: Arc<EventBus>,
    pub contacts: Arc<ContactService>,
    pub runner: Arc<OperationRunner>,
    pub start_time: DateTime<Utc>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    /// Wire the contact service, result processor and operation runner
    /// for `config` over the given stores.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn DataStore>,
        results: Arc<dyn ResultStore>,
    ) -> Result<Self, LearningError> {
        let events = Arc::new(EventBus::default());

        let processor = ResultProcessor::new(store.clone(), results.clone())
            .with_learner(Arc::new(PatternLearner::new(&config.learning.patterns)?))
            .with_parser(Arc::new(ParserRegistry::with_builtins()));

        let report = Arc::new(BeaconReport::with_sinks(
            config.contacts.report_capacity,
            vec![Box::new(TracingSink)],
        ));

        let contacts = Arc::new(ContactService::new(
            store.clone(),
            processor,
            events.clone(),
            report,
            config.agents.clone(),
        ));
        let runner = Arc::new(OperationRunner::new(
            store.clone(),
            events.clone(),
            config.planner.clone(),
        ));

        Ok(Self {
            config,
            store,
            results,
            events,
            contacts,
            runner,
            start_time: Utc::now(),
        })
    }

    /// Load the configured abilities and adversaries into the data store.
    pub async fn seed(&self) -> Result<(), StoreError> {
        for ability in &self.config.abilities {
            self.store.store_ability(ability.clone()).await?;
        }
        for adversary in &self.config.adversaries {
            self.store.store_adversary(adversary.clone()).await?;
        }
        info!(
            abilities = self.config.abilities.len(),
            adversaries = self.config.adversaries.len(),
            sources = self.config.sources.len(),
            "Content loaded"
        );
        Ok(())
    }
}

/// Build the Axum router with all gateway routes.
///
/// Layers applied:
/// - Request body size limit (`gateway.body_limit_bytes`)
/// - CORS restricted to localhost origins for the operator API
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let body_limit = state.config.gateway.body_limit_bytes;

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin, _| {
            origin.as_bytes().starts_with(b"http://localhost")
                || origin.as_bytes().starts_with(b"http://127.0.0.1")
        }))
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .route("/beacon", post(beacon::beacon_handler))
        .nest("/api", api::api_router())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway: load content, start contacts and the watchdog, then
/// serve until the listener fails.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let store: Arc<dyn DataStore> = Arc::new(InMemoryStore::new());
    let results: Arc<dyn ResultStore> =
        Arc::new(FileResultStore::new(config.results.resolved_directory()));
    let state = Arc::new(GatewayState::new(config, store, results)?);
    state.seed().await?;

    let mut registry = ContactRegistry::new();
    registry.register(Arc::new(HttpContact::new(&state.config.contacts.http)));
    let started = registry.start_all().await;
    info!(contacts = ?started, "Contacts started");

    let watchdog = if state.config.watchdog.enabled {
        let dog = Arc::new(Watchdog::new(
            state.store.clone(),
            state.events.clone(),
            state.config.watchdog.clone(),
            Duration::from_secs(state.config.agents.untrusted_timer),
        ));
        Some(dog.start())
    } else {
        warn!("Watchdog disabled, abandoned links will stay in EXECUTE");
        None
    };

    let app = build_router(state);

    info!(addr = %addr, "Gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app).await;

    if let Some(handle) = watchdog {
        handle.abort();
    }
    registry.stop_all().await;
    served?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: i64,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (Utc::now() - state.start_time).num_seconds(),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use redline_core::{Ability, Adversary, Executor};
    use redline_store::InMemoryResultStore;

    pub fn test_state() -> SharedState {
        test_state_with(AppConfig::default())
    }

    pub fn test_state_with(config: AppConfig) -> SharedState {
        Arc::new(
            GatewayState::new(
                config,
                Arc::new(InMemoryStore::new()),
                Arc::new(InMemoryResultStore::new()),
            )
            .unwrap(),
        )
    }

    pub fn whoami() -> Ability {
        Ability {
            ability_id: "whoami".into(),
            name: "Find user".into(),
            tactic: "discovery".into(),
            technique: "T1033".into(),
            executors: vec![Executor {
                name: "sh".into(),
                platform: "linux".into(),
                command: "whoami".into(),
                timeout: 60,
                payloads: vec![],
                uploads: vec![],
                cleanup: vec![],
                parsers: vec![],
            }],
            delete_payload: false,
            visibility: 50,
        }
    }

    pub fn adversary() -> Adversary {
        Adversary {
            adversary_id: "recon".into(),
            name: "Recon".into(),
            description: String::new(),
            atomic_ordering: vec!["whoami".into()],
        }
    }

    pub async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }
}
