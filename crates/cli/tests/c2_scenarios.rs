//! End-to-end scenarios for the redline C2 server.
//!
//! These tests wire the real contact service, result processor, operation
//! runner and HTTP router over in-memory stores, and drive them the way an
//! agent would: beacon, receive instructions, report results.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use redline_channels::{ContactService, ResultProcessor};
use redline_config::{AgentsConfig, AppConfig, PlannerConfig};
use redline_core::encoding;
use redline_core::{
    Ability, Adversary, Agent, AgentProfile, CommandResults, DataStore, DomainEvent, EventBus,
    Executor, Instruction, LinkResult, LinkStatus, Operation, OperationState, ResultStore,
};
use redline_gateway::{GatewayState, build_router};
use redline_security::BeaconReport;
use redline_store::{InMemoryResultStore, InMemoryStore};
use redline_workflow::OperationRunner;

// ── Fixtures ─────────────────────────────────────────────────────────────

struct Server {
    store: Arc<InMemoryStore>,
    results: Arc<InMemoryResultStore>,
    events: Arc<EventBus>,
    contacts: ContactService,
    runner: Arc<OperationRunner>,
}

impl Server {
    fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let results = Arc::new(InMemoryResultStore::new());
        let events = Arc::new(EventBus::default());
        let processor = ResultProcessor::new(store.clone(), results.clone());
        let contacts = ContactService::new(
            store.clone(),
            processor,
            events.clone(),
            Arc::new(BeaconReport::default()),
            AgentsConfig::default(),
        );
        let runner = Arc::new(OperationRunner::new(
            store.clone(),
            events.clone(),
            PlannerConfig {
                poll_interval_ms: 5,
                wait_for_result: false,
                cleanup_timeout_secs: 1,
            },
        ));
        Self {
            store,
            results,
            events,
            contacts,
            runner,
        }
    }

    async fn with_abilities(ids: &[&str]) -> Self {
        let server = Self::new();
        for id in ids {
            server.store.store_ability(ability(id)).await.unwrap();
        }
        server
    }

    async fn beacon(&self, paw: Option<&str>, group: &str) -> (Agent, Vec<Instruction>) {
        self.report(paw, group, Vec::new()).await
    }

    async fn report(
        &self,
        paw: Option<&str>,
        group: &str,
        results: Vec<LinkResult>,
    ) -> (Agent, Vec<Instruction>) {
        let profile = AgentProfile {
            paw: paw.map(String::from),
            platform: Some("linux".into()),
            host: Some("target-01".into()),
            group: Some(group.into()),
            contact: Some("http".into()),
            executors: Some(vec!["sh".into()]),
            ..AgentProfile::default()
        };
        self.contacts.handle_heartbeat(profile, results).await.unwrap()
    }

    async fn operation(&self, group: &str, ordering: &[&str]) -> Operation {
        let mut op = Operation::new("scenario", adversary(ordering), group);
        for agent in self.store.agents().await.unwrap() {
            if op.includes_agent(&agent) {
                op.add_agent(&agent.paw);
            }
        }
        self.store.store_operation(op).await.unwrap()
    }

    /// Wait until the operation's chain holds at least `count` links.
    async fn chain_of(&self, op_id: &str, count: usize) -> Vec<String> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let op = self.store.find_operation(op_id).await.unwrap().unwrap();
                if op.chain.len() >= count {
                    return op.chain;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("planner did not apply links in time")
    }
}

fn ability(id: &str) -> Ability {
    Ability {
        ability_id: id.into(),
        name: id.into(),
        tactic: "discovery".into(),
        technique: "T1082".into(),
        executors: vec![Executor {
            name: "sh".into(),
            platform: "linux".into(),
            command: format!("{id} --paw #{{paw}}"),
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

fn adversary(ordering: &[&str]) -> Adversary {
    Adversary {
        adversary_id: "adv".into(),
        name: "Scenario".into(),
        description: String::new(),
        atomic_ordering: ordering.iter().map(|s| s.to_string()).collect(),
    }
}

fn success(link_id: &str, stdout: &str) -> LinkResult {
    LinkResult {
        id: link_id.into(),
        output: encoding::encode_string(stdout),
        stderr: String::new(),
        exit_code: json!(0),
        status: 0,
        pid: 4242,
        agent_reported_time: Some("2026-01-01T00:00:00Z".into()),
    }
}

fn decoded_command(instruction: &Instruction) -> String {
    encoding::decode_bytes(&instruction.command).unwrap()
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn round_trip_single_ability() {
    let server = Server::with_abilities(&["abilityX"]).await;
    let (agent, none) = server.beacon(None, "red").await;
    assert!(none.is_empty());

    let op = server.operation("red", &["abilityX"]).await;
    let run = server.runner.clone().spawn(op.id.clone());
    let chain = server.chain_of(&op.id, 1).await;

    // First heartbeat after planning: exactly one instruction.
    let (_, instructions) = server.beacon(Some(&agent.paw), "red").await;
    assert_eq!(instructions.len(), 1);
    assert_eq!(instructions[0].id, chain[0]);
    assert_eq!(
        decoded_command(&instructions[0]),
        format!("abilityX --paw {}", agent.paw)
    );

    // Second heartbeat carries the result: no instructions in reply.
    let (_, reply) = server
        .report(Some(&agent.paw), "red", vec![success(&chain[0], "done\n")])
        .await;
    assert!(reply.is_empty());

    let link = server.store.find_link(&chain[0]).await.unwrap().unwrap();
    assert_eq!(link.status, LinkStatus::Success);
    assert_eq!(link.pid, Some(4242));
    assert!(link.output);

    // Nothing further to hand out, and the run loop terminates.
    let latest = server.store.find_agent(&agent.paw).await.unwrap().unwrap();
    assert!(server.contacts.get_instructions(&latest).await.unwrap().is_empty());
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run loop did not terminate")
        .unwrap();
    let op = server.store.find_operation(&op.id).await.unwrap().unwrap();
    assert_eq!(op.state, OperationState::Finished);
    assert_eq!(op.chain.len(), 1);

    let blob = server.results.read_result_file(&chain[0]).await.unwrap();
    assert_eq!(CommandResults::decode(&blob).unwrap().stdout, "done\n");
}

#[tokio::test]
async fn planner_walks_the_ordering_and_terminates() {
    let server = Server::with_abilities(&["a1", "a2", "a3"]).await;
    let (agent, _) = server.beacon(None, "red").await;
    let op = server.operation("red", &["a3", "a1", "a2"]).await;
    let run = server.runner.clone().spawn(op.id.clone());

    let mut executed = Vec::new();
    for pass in 1..=3 {
        let chain = server.chain_of(&op.id, pass).await;
        let (_, instructions) = server.beacon(Some(&agent.paw), "red").await;
        assert_eq!(instructions.len(), 1, "one link per agent per pass");
        assert_eq!(instructions[0].id, chain[pass - 1]);
        executed.push(decoded_command(&instructions[0]));
        server
            .report(Some(&agent.paw), "red", vec![success(&instructions[0].id, "")])
            .await;
    }

    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run loop did not terminate")
        .unwrap();
    let prefixes: Vec<&str> = executed
        .iter()
        .map(|c| c.split_whitespace().next().unwrap())
        .collect();
    assert_eq!(prefixes, vec!["a3", "a1", "a2"]);
}

#[tokio::test]
async fn group_reconciliation_attaches_matching_operations_only() {
    let server = Server::with_abilities(&["a1"]).await;
    let red = server.operation("red", &["a1"]).await;
    let everyone = server.operation("", &["a1"]).await;
    let blue = server.operation("blue", &["a1"]).await;

    let (agent, _) = server.beacon(None, "red").await;

    let attached = |op: &Operation| op.agents.contains(&agent.paw);
    let red = server.store.find_operation(&red.id).await.unwrap().unwrap();
    let everyone = server.store.find_operation(&everyone.id).await.unwrap().unwrap();
    let blue_now = server.store.find_operation(&blue.id).await.unwrap().unwrap();
    assert!(attached(&red));
    assert!(attached(&everyone));
    assert!(!attached(&blue_now));

    // Regrouping on a later beacon picks up the blue operation.
    server.beacon(Some(&agent.paw), "blue").await;
    let blue_now = server.store.find_operation(&blue.id).await.unwrap().unwrap();
    assert!(attached(&blue_now));
}

#[tokio::test]
async fn concurrent_beacons_deliver_each_link_once() {
    let server = Arc::new(Server::with_abilities(&["a1"]).await);
    let (agent, _) = server.beacon(None, "red").await;
    let op = server.operation("red", &["a1"]).await;
    let run = server.runner.clone().spawn(op.id.clone());
    server.chain_of(&op.id, 1).await;

    let mut beacons = Vec::new();
    for _ in 0..16 {
        let server = server.clone();
        let paw = agent.paw.clone();
        beacons.push(tokio::spawn(async move {
            server.beacon(Some(&paw), "red").await.1.len()
        }));
    }
    let mut delivered = 0;
    for beacon in beacons {
        delivered += beacon.await.unwrap();
    }
    assert_eq!(delivered, 1);
    run.abort();
}

#[tokio::test]
async fn agents_never_receive_each_others_links() {
    let server = Server::with_abilities(&["a1"]).await;
    let (alice, _) = server.beacon(None, "red").await;
    let (bob, _) = server.beacon(None, "red").await;
    let op = server.operation("red", &["a1"]).await;
    let run = server.runner.clone().spawn(op.id.clone());
    server.chain_of(&op.id, 2).await;

    let (_, for_alice) = server.beacon(Some(&alice.paw), "red").await;
    let (_, for_bob) = server.beacon(Some(&bob.paw), "red").await;
    assert_eq!(for_alice.len(), 1);
    assert_eq!(for_bob.len(), 1);

    for (paw, instruction) in [(&alice.paw, &for_alice[0]), (&bob.paw, &for_bob[0])] {
        let link = server.store.find_link(&instruction.id).await.unwrap().unwrap();
        assert_eq!(&link.paw, paw);
        assert!(decoded_command(instruction).ends_with(paw.as_str()));
    }
    run.abort();
}

#[tokio::test]
async fn repeated_results_complete_the_link_once() {
    let server = Server::with_abilities(&["a1"]).await;
    let (agent, _) = server.beacon(None, "red").await;
    let op = server.operation("red", &["a1"]).await;
    let run = server.runner.clone().spawn(op.id.clone());
    server.chain_of(&op.id, 1).await;
    let (_, instructions) = server.beacon(Some(&agent.paw), "red").await;
    let link_id = instructions[0].id.clone();

    let mut rx = server.events.subscribe();
    server
        .report(Some(&agent.paw), "red", vec![success(&link_id, "first")])
        .await;
    let mut retry = success(&link_id, "second");
    retry.status = 1;
    server.report(Some(&agent.paw), "red", vec![retry]).await;

    let link = server.store.find_link(&link_id).await.unwrap().unwrap();
    assert_eq!(link.status, LinkStatus::Success);
    let blob = server.results.read_result_file(&link_id).await.unwrap();
    assert_eq!(CommandResults::decode(&blob).unwrap().stdout, "first");

    let mut completions = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event.as_ref(), DomainEvent::LinkCompleted { .. }) {
            completions += 1;
        }
    }
    assert_eq!(completions, 1);
    run.abort();
}

#[tokio::test]
async fn results_for_unknown_links_are_kept() {
    let server = Server::new();
    let (agent, _) = server.beacon(None, "red").await;

    let (_, reply) = server
        .report(Some(&agent.paw), "red", vec![success("gone-link", "orphaned")])
        .await;
    assert!(reply.is_empty());
    let blob = server.results.read_result_file("gone-link").await.unwrap();
    assert_eq!(CommandResults::decode(&blob).unwrap().stdout, "orphaned");
}

// ── Over HTTP ────────────────────────────────────────────────────────────

async fn post_beacon(app: &axum::Router, profile: Value) -> Value {
    let request = Request::builder()
        .method("POST")
        .uri("/beacon")
        .body(Body::from(encoding::encode_string(&profile.to_string())))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    serde_json::from_str(&encoding::decode_bytes(&text).unwrap()).unwrap()
}

fn wire_instructions(envelope: &Value) -> Vec<Value> {
    let bodies: Vec<String> =
        serde_json::from_str(envelope["instructions"].as_str().unwrap()).unwrap();
    bodies
        .iter()
        .map(|b| serde_json::from_str(b).unwrap())
        .collect()
}

#[tokio::test]
async fn http_operator_and_agent_round_trip() {
    let mut config = AppConfig::default();
    config.planner.poll_interval_ms = 5;
    config.abilities.push(ability("abilityX"));
    config.adversaries.push(adversary(&["abilityX"]));
    let state = Arc::new(
        GatewayState::new(
            config,
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryResultStore::new()),
        )
        .unwrap(),
    );
    state.seed().await.unwrap();
    let app = build_router(state.clone());

    let hello = post_beacon(
        &app,
        json!({"platform": "linux", "host": "web-01", "group": "red", "executors": ["sh"]}),
    )
    .await;
    let paw = hello["paw"].as_str().unwrap().to_string();

    let create = Request::builder()
        .method("POST")
        .uri("/api/operations")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"name": "Recon", "adversary_id": "adv", "group": "red"}).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(create).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let op: Value = serde_json::from_slice(&body).unwrap();
    let op_id = op["id"].as_str().unwrap().to_string();
    assert_eq!(op["agents"][0], paw.as_str());

    // Beacon until the run loop has planned the link.
    let instruction = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let envelope = post_beacon(&app, json!({"paw": paw})).await;
            if let Some(first) = wire_instructions(&envelope).into_iter().next() {
                return first;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("no instruction delivered");
    let link_id = instruction["id"].as_str().unwrap().to_string();

    let done = post_beacon(
        &app,
        json!({"paw": paw, "results": [{
            "id": link_id,
            "output": encoding::encode_string("uid=0(root)\n"),
            "stderr": "",
            "exit_code": "0",
            "status": "0",
            "pid": "77"
        }]}),
    )
    .await;
    assert!(wire_instructions(&done).is_empty());

    let result = Request::builder()
        .uri(format!("/api/links/{link_id}/result"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(result).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let output: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(output["stdout"], "uid=0(root)\n");

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let op = state.store.find_operation(&op_id).await.unwrap().unwrap();
            if op.state == OperationState::Finished {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("operation did not finish");
}
