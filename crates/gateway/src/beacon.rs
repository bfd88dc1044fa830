//! The HTTP contact: agents `POST /beacon` with a base64 JSON profile and
//! get a base64 JSON envelope back.
//!
//! Any failure while handling a beacon is logged and answered with an empty
//! body, so a broken or probing client cannot tell failure modes apart.

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{debug, info, warn};

use redline_core::encoding;
use redline_core::error::ContactError;
use redline_core::instruction::encode_instruction_list;
use redline_core::{AgentProfile, Contact, ExecutorChange};

use crate::{GatewayState, SharedState};

pub struct HttpContact {
    name: String,
}

impl HttpContact {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

#[async_trait]
impl Contact for HttpContact {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Accept beacons over HTTP POST /beacon"
    }

    async fn start(&self) -> Result<(), ContactError> {
        info!(contact = %self.name, "Beacon endpoint mounted at /beacon");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct BeaconResponse {
    paw: String,
    sleep: u32,
    watchdog: u32,
    /// JSON array of JSON-encoded instructions, itself a JSON string.
    instructions: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_contact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    executor_change: Option<ExecutorChange>,
}

pub(crate) async fn beacon_handler(
    State(state): State<SharedState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "Unreadable beacon dropped");
            return StatusCode::OK.into_response();
        }
    };
    debug!(bytes = body.len(), "Beacon received");
    match respond(&state, &body).await {
        Ok(encoded) => encoded.into_response(),
        Err(e) => {
            warn!(error = %e, bytes = body.len(), "Malformed beacon dropped");
            StatusCode::OK.into_response()
        }
    }
}

async fn respond(state: &GatewayState, body: &[u8]) -> redline_core::Result<String> {
    let mut profile: AgentProfile = encoding::decode_json(body)?;
    if profile.contact.is_none() {
        profile.contact = Some(state.config.contacts.http.clone());
    }
    let results = std::mem::take(&mut profile.results);
    debug!(
        paw = profile.paw.as_deref().unwrap_or("NEW"),
        platform = profile.platform.as_deref().unwrap_or("?"),
        results = results.len(),
        "Decoded beacon profile"
    );

    let (agent, instructions) = state.contacts.handle_heartbeat(profile, results).await?;
    let executor_change = state.contacts.take_executor_change(&agent.paw).await;

    let new_contact = agent.has_pending_contact().then(|| {
        debug!(paw = %agent.paw, from = %agent.contact, to = %agent.pending_contact, "Asking agent to switch contact");
        agent.pending_contact.clone()
    });

    let response = BeaconResponse {
        paw: agent.paw.clone(),
        sleep: agent.calculate_sleep(),
        watchdog: agent.watchdog,
        instructions: encode_instruction_list(&instructions)?,
        new_contact,
        executor_change,
    };
    debug!(paw = %response.paw, sleep = response.sleep, instructions = instructions.len(), "Beacon answered");
    Ok(encoding::encode_string(&serde_json::to_string(&response)?))
}
