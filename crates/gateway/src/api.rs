//! Operator API: plain JSON over `/api`.
//!
//! Endpoints:
//!
//! - `GET   /api/agents`                             : List agents
//! - `PATCH /api/agents/{paw}`                       : Regroup, (un)trust, retune an agent
//! - `GET   /api/abilities`                          : Loaded abilities
//! - `GET   /api/adversaries`                        : Loaded adversary profiles
//! - `POST  /api/operations`                         : Create and start an operation
//! - `GET   /api/operations`                         : List operations
//! - `GET   /api/operations/{id}`                    : One operation
//! - `PATCH /api/operations/{id}`                    : Pause, resume or finish
//! - `GET   /api/operations/{id}/links`              : The operation's chain
//! - `PATCH /api/operations/{id}/links/{link_id}`    : Approve or discard a gated link
//! - `GET   /api/links/{link_id}/result`             : Decoded command output
//! - `GET   /api/contacts/{name}/report`             : Beacon audit log

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use redline_core::error::{ResultStoreError, StoreError};
use redline_core::{
    Ability, Adversary, Agent, CommandResults, ExecutorChange, Link, LinkStatus, Operation,
    OperationState,
};
use redline_security::BeaconLog;

use crate::SharedState;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the operator router. Nest this under "/api" in the main router.
pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/agents", get(list_agents_handler))
        .route("/agents/{paw}", axum::routing::patch(update_agent_handler))
        .route("/abilities", get(list_abilities_handler))
        .route("/adversaries", get(list_adversaries_handler))
        .route(
            "/operations",
            get(list_operations_handler).post(create_operation_handler),
        )
        .route(
            "/operations/{id}",
            get(get_operation_handler).patch(update_operation_handler),
        )
        .route("/operations/{id}/links", get(list_links_handler))
        .route(
            "/operations/{id}/links/{link_id}",
            axum::routing::patch(update_link_handler),
        )
        .route("/links/{link_id}/result", get(link_result_handler))
        .route("/contacts/{name}/report", get(contact_report_handler))
}

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match e {
            StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::Conflict { .. } => StatusCode::CONFLICT,
            StoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ── Agents ────────────────────────────────────────────────────────────────

async fn list_agents_handler(State(state): State<SharedState>) -> ApiResult<Vec<Agent>> {
    Ok(Json(state.store.agents().await?))
}

#[derive(Debug, Default, Deserialize)]
struct UpdateAgentRequest {
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    trusted: Option<bool>,
    #[serde(default)]
    sleep_min: Option<u32>,
    #[serde(default)]
    sleep_max: Option<u32>,
    #[serde(default)]
    watchdog: Option<u32>,
    #[serde(default)]
    pending_contact: Option<String>,
    #[serde(default)]
    executor_change: Option<ExecutorChange>,
}

impl UpdateAgentRequest {
    fn apply(&self, agent: &mut Agent) {
        if let Some(group) = &self.group {
            agent.group.clone_from(group);
        }
        if let Some(trusted) = self.trusted {
            agent.trusted = trusted;
            agent.silenced = false;
            if trusted {
                agent.last_seen = Utc::now();
            }
        }
        if let Some(min) = self.sleep_min {
            agent.sleep_min = min;
        }
        if let Some(max) = self.sleep_max {
            agent.sleep_max = max;
        }
        if let Some(watchdog) = self.watchdog {
            agent.watchdog = watchdog;
        }
        if let Some(contact) = &self.pending_contact {
            agent.pending_contact.clone_from(contact);
        }
        if let Some(change) = &self.executor_change {
            agent.pending_executor_change = Some(change.clone());
        }
    }
}

async fn update_agent_handler(
    State(state): State<SharedState>,
    Path(paw): Path<String>,
    Json(req): Json<UpdateAgentRequest>,
) -> ApiResult<Agent> {
    let mut preview = state
        .store
        .find_agent(&paw)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Agent '{paw}' not found")))?;
    req.apply(&mut preview);
    if preview.sleep_min > preview.sleep_max {
        return Err(ApiError::bad_request("sleep_min must not exceed sleep_max"));
    }

    let agent = state
        .store
        .modify_agent(&paw, &mut |a| req.apply(a))
        .await?;
    info!(paw = %agent.paw, group = %agent.group, trusted = agent.trusted, "Agent updated");

    // A regrouped agent may now belong to running operations.
    if req.group.is_some() {
        state.contacts.add_agent_to_operations(&agent).await;
    }
    Ok(Json(agent))
}

// ── Content ───────────────────────────────────────────────────────────────

async fn list_abilities_handler(State(state): State<SharedState>) -> ApiResult<Vec<Ability>> {
    Ok(Json(state.store.abilities().await?))
}

async fn list_adversaries_handler(State(state): State<SharedState>) -> ApiResult<Vec<Adversary>> {
    Ok(Json(state.store.adversaries().await?))
}

// ── Operations ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateOperationRequest {
    name: String,
    adversary_id: String,
    #[serde(default)]
    group: String,
    #[serde(default)]
    planner: Option<String>,
    #[serde(default)]
    autonomous: Option<bool>,
    #[serde(default)]
    visibility: Option<u32>,
    #[serde(default)]
    use_learning_parsers: Option<bool>,
    /// Id of a configured fact source to seed the operation with.
    #[serde(default)]
    source: Option<String>,
}

async fn create_operation_handler(
    State(state): State<SharedState>,
    Json(req): Json<CreateOperationRequest>,
) -> Result<(StatusCode, Json<Operation>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::bad_request("Operation name must not be empty"));
    }
    let adversary = state
        .store
        .find_adversary(&req.adversary_id)
        .await?
        .ok_or_else(|| {
            ApiError::bad_request(format!("Adversary '{}' not found", req.adversary_id))
        })?;

    let mut operation = Operation::new(req.name.trim(), adversary, req.group.clone());
    if let Some(planner) = req.planner {
        operation.planner = planner;
    }
    if let Some(autonomous) = req.autonomous {
        operation.autonomous = autonomous;
    }
    if let Some(visibility) = req.visibility {
        operation.visibility = visibility;
    }
    if let Some(parsers) = req.use_learning_parsers {
        operation.use_learning_parsers = parsers;
    }
    if let Some(source_id) = &req.source {
        let source = state
            .config
            .sources
            .iter()
            .find(|s| &s.id == source_id)
            .ok_or_else(|| ApiError::bad_request(format!("Source '{source_id}' not found")))?;
        operation.source = source.facts.clone();
    }

    for agent in state.store.agents().await? {
        if operation.includes_agent(&agent) {
            operation.add_agent(&agent.paw);
        }
    }

    let operation = state.store.store_operation(operation).await?;
    info!(
        operation = %operation.name,
        id = %operation.id,
        group = %operation.group,
        agents = operation.agents.len(),
        "Operation created"
    );
    state.runner.clone().spawn(operation.id.clone());

    Ok((StatusCode::CREATED, Json(operation)))
}

async fn list_operations_handler(State(state): State<SharedState>) -> ApiResult<Vec<Operation>> {
    Ok(Json(state.store.operations().await?))
}

async fn find_operation(state: &SharedState, id: &str) -> Result<Operation, ApiError> {
    state
        .store
        .find_operation(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Operation '{id}' not found")))
}

async fn get_operation_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Operation> {
    Ok(Json(find_operation(&state, &id).await?))
}

#[derive(Debug, Deserialize)]
struct UpdateOperationRequest {
    state: OperationState,
}

async fn update_operation_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateOperationRequest>,
) -> ApiResult<Operation> {
    let current = find_operation(&state, &id).await?;
    if !current.is_open() && req.state != OperationState::Finished {
        return Err(ApiError::conflict(format!(
            "Operation '{}' has already finished",
            current.name
        )));
    }

    let now = Utc::now();
    let operation = state
        .store
        .modify_operation(&id, &mut |op| {
            op.state = req.state;
            if req.state == OperationState::Finished && op.finish.is_none() {
                op.finish = Some(now);
            }
        })
        .await?;
    info!(operation = %operation.name, state = ?operation.state, "Operation state changed");
    Ok(Json(operation))
}

// ── Links ─────────────────────────────────────────────────────────────────

async fn list_links_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<Link>> {
    let operation = find_operation(&state, &id).await?;
    Ok(Json(state.store.links(&operation.chain).await?))
}

#[derive(Debug, Deserialize)]
struct UpdateLinkRequest {
    /// Target status code: EXECUTE (-3) or DISCARD (-2).
    status: LinkStatus,
}

const fn is_gated(status: LinkStatus) -> bool {
    matches!(
        status,
        LinkStatus::Pause | LinkStatus::HighViz | LinkStatus::Untrusted
    )
}

async fn update_link_handler(
    State(state): State<SharedState>,
    Path((id, link_id)): Path<(String, String)>,
    Json(req): Json<UpdateLinkRequest>,
) -> ApiResult<Link> {
    if !matches!(req.status, LinkStatus::Execute | LinkStatus::Discard) {
        return Err(ApiError::bad_request(format!(
            "Links can only be approved (EXECUTE) or discarded (DISCARD), not {}",
            req.status
        )));
    }

    let link = state
        .store
        .find_link(&link_id)
        .await?
        .filter(|l| l.operation.as_deref() == Some(id.as_str()))
        .ok_or_else(|| ApiError::not_found(format!("Link '{link_id}' not in operation '{id}'")))?;
    if link.status.is_terminal() {
        return Err(ApiError::conflict(format!(
            "Link '{link_id}' already finished with {}",
            link.status
        )));
    }

    // Re-checked under the link's lock: a result may land in between.
    let updated = state
        .store
        .modify_link(&link_id, &mut |l| {
            if !is_gated(l.status) {
                return false;
            }
            l.status = req.status;
            true
        })
        .await?;

    match updated {
        Some(link) => {
            info!(link_id = %link.id, status = %link.status, "Gated link resolved");
            Ok(Json(link))
        }
        None => {
            warn!(link_id = %link_id, status = %link.status, "Link is not awaiting approval");
            Err(ApiError::conflict(format!(
                "Link '{link_id}' is {} and not awaiting approval",
                link.status
            )))
        }
    }
}

async fn link_result_handler(
    State(state): State<SharedState>,
    Path(link_id): Path<String>,
) -> ApiResult<CommandResults> {
    let blob = state
        .results
        .read_result_file(&link_id)
        .await
        .map_err(|e| match &e {
            ResultStoreError::NotFound(_) => ApiError::not_found(e.to_string()),
            ResultStoreError::InvalidId(_) => ApiError::bad_request(e.to_string()),
            ResultStoreError::Io(_) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        })?;
    let results = CommandResults::decode(&blob)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(results))
}

// ── Contacts ──────────────────────────────────────────────────────────────

async fn contact_report_handler(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Json<Vec<BeaconLog>> {
    Json(state.contacts.report().entries(&name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_router;
    use crate::test_support::*;
    use redline_core::{DataStore, ResultStore};
    use serde_json::json;
    use tower::ServiceExt;

    async fn seeded() -> SharedState {
        let state = test_state();
        state.store.store_ability(whoami()).await.unwrap();
        state.store.store_adversary(adversary()).await.unwrap();
        state
    }

    async fn gated_link(state: &SharedState, status: LinkStatus) -> (Operation, Link) {
        let op = state
            .store
            .store_operation(Operation::new("op", adversary(), "red"))
            .await
            .unwrap();
        let ability = whoami();
        let mut link = Link::new("abc123", ability.clone(), ability.executors[0].clone(), "whoami".into());
        link.operation = Some(op.id.clone());
        link.status = status;
        let link = state.store.store_link(link).await.unwrap();
        (op, link)
    }

    #[tokio::test]
    async fn create_operation_attaches_matching_agents() {
        let state = seeded().await;
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/operations",
                json!({"name": "Recon", "adversary_id": "recon", "group": "red"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["name"], "Recon");
        assert_eq!(body["adversary"]["atomic_ordering"][0], "whoami");

        let list = body_json(app.oneshot(get_req("/api/operations")).await.unwrap()).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_operation_rejects_unknown_adversary() {
        let app = build_router(seeded().await);
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/operations",
                json!({"name": "Recon", "adversary_id": "nope"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_operation_is_404() {
        let app = build_router(test_state());
        let response = app.oneshot(get_req("/api/operations/missing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn pause_and_finish_operation() {
        let state = seeded().await;
        let op = state
            .store
            .store_operation(Operation::new("op", adversary(), "red"))
            .await
            .unwrap();
        let app = build_router(state.clone());
        let uri = format!("/api/operations/{}", op.id);

        let paused = body_json(
            app.clone()
                .oneshot(json_request("PATCH", &uri, json!({"state": "paused"})))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(paused["state"], "paused");

        let finished = body_json(
            app.clone()
                .oneshot(json_request("PATCH", &uri, json!({"state": "finished"})))
                .await
                .unwrap(),
        )
        .await;
        assert!(finished["finish"].is_string());

        let response = app
            .oneshot(json_request("PATCH", &uri, json!({"state": "running"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn approve_gated_link() {
        let state = test_state();
        let (op, link) = gated_link(&state, LinkStatus::Pause).await;
        let app = build_router(state.clone());

        let response = app
            .oneshot(json_request(
                "PATCH",
                &format!("/api/operations/{}/links/{}", op.id, link.id),
                json!({"status": -3}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let stored = state.store.find_link(&link.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LinkStatus::Execute);
    }

    #[tokio::test]
    async fn finished_links_cannot_be_changed() {
        let state = test_state();
        let (op, link) = gated_link(&state, LinkStatus::Success).await;
        let app = build_router(state);

        let response = app
            .oneshot(json_request(
                "PATCH",
                &format!("/api/operations/{}/links/{}", op.id, link.id),
                json!({"status": -2}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn only_gate_transitions_are_accepted() {
        let state = test_state();
        let (op, link) = gated_link(&state, LinkStatus::HighViz).await;
        let app = build_router(state);

        let response = app
            .oneshot(json_request(
                "PATCH",
                &format!("/api/operations/{}/links/{}", op.id, link.id),
                json!({"status": 0}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn link_result_is_decoded() {
        let state = test_state();
        let blob = CommandResults {
            stdout: "root\n".into(),
            stderr: String::new(),
            exit_code: json!(0),
        }
        .encode()
        .unwrap();
        state.results.write_result_file("l1", &blob).await.unwrap();
        let app = build_router(state);

        let body = body_json(app.clone().oneshot(get_req("/api/links/l1/result")).await.unwrap()).await;
        assert_eq!(body["stdout"], "root\n");

        let missing = app.oneshot(get_req("/api/links/l2/result")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_agent_validates_sleep_bounds() {
        let state = test_state();
        let agent = state
            .store
            .store_agent(Agent::from_profile(
                &redline_core::AgentProfile::default(),
                redline_core::AgentDefaults::default(),
            ))
            .await
            .unwrap();
        let app = build_router(state.clone());
        let uri = format!("/api/agents/{}", agent.paw);

        let bad = app
            .clone()
            .oneshot(json_request("PATCH", &uri, json!({"sleep_min": 120})))
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let ok = body_json(
            app.clone()
                .oneshot(json_request("PATCH", &uri, json!({"group": "blue", "trusted": false})))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(ok["group"], "blue");
        assert_eq!(ok["trusted"], false);

        let missing = app
            .oneshot(json_request("PATCH", "/api/agents/zzzzzz", json!({})))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn contact_report_lists_beacons() {
        let state = test_state();
        state.contacts.report().record("http", "abc123", vec!["whoami".into()]);
        let app = build_router(state);

        let body = body_json(app.oneshot(get_req("/api/contacts/http/report")).await.unwrap()).await;
        assert_eq!(body[0]["paw"], "abc123");
        assert_eq!(body[0]["instructions"][0], "whoami");
    }
}
