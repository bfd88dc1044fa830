//! Result processor: applies an agent's reported result to its link.
//!
//! The pipeline never fails its caller: store and blob errors are logged,
//! and learning runs on a spawned task that catches its own errors. A link
//! that already reached a terminal status is never re-applied.

use std::sync::Arc;

use chrono::Utc;
use redline_core::encoding;
use redline_core::{
    Access, CommandResults, DataStore, Fact, FactLearner, HookRegistry, Link, LinkParser,
    LinkResult, Operation, ResultStore,
};
use tracing::{debug, error, warn};

/// What happened to a reported result.
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    /// The link moved to the reported terminal status.
    Applied { link: Link, access: Access },
    /// The link was already terminal; nothing changed.
    AlreadyFinished,
    /// No such link. The output was still written under the result id.
    UnknownLink,
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }
}

/// Which downstream consumer a link's output is handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LearningRoute {
    AgentFacts,
    ParseWithoutOperation,
    ParseWithOperation,
    OperationFacts,
    Skip,
}

fn learning_route(link: &Link, operation: Option<&Operation>) -> LearningRoute {
    let has_parsers = !link.executor.parsers.is_empty();
    match operation {
        None if !has_parsers => LearningRoute::AgentFacts,
        None => LearningRoute::ParseWithoutOperation,
        Some(_) if has_parsers => LearningRoute::ParseWithOperation,
        Some(op) if op.use_learning_parsers => LearningRoute::OperationFacts,
        Some(_) => LearningRoute::Skip,
    }
}

#[derive(Clone)]
pub struct ResultProcessor {
    store: Arc<dyn DataStore>,
    results: Arc<dyn ResultStore>,
    learner: Option<Arc<dyn FactLearner>>,
    parser: Option<Arc<dyn LinkParser>>,
    hooks: Arc<HookRegistry>,
}

impl ResultProcessor {
    pub fn new(store: Arc<dyn DataStore>, results: Arc<dyn ResultStore>) -> Self {
        Self {
            store,
            results,
            learner: None,
            parser: None,
            hooks: Arc::new(HookRegistry::new()),
        }
    }

    pub fn with_learner(mut self, learner: Arc<dyn FactLearner>) -> Self {
        self.learner = Some(learner);
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn LinkParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Apply a result reported by `reporter`.
    pub async fn apply(&self, result: LinkResult, reporter: &str) -> ApplyOutcome {
        let link = match self.store.find_link(&result.id).await {
            Ok(Some(link)) => link,
            Ok(None) => {
                warn!(link_id = %result.id, paw = %reporter, "Result for unknown link");
                self.write_blob(&result.id, &result.output, &result).await;
                return ApplyOutcome::UnknownLink;
            }
            Err(e) => {
                error!(link_id = %result.id, error = %e, "Link lookup failed, storing output only");
                self.write_blob(&result.id, &result.output, &result).await;
                return ApplyOutcome::UnknownLink;
            }
        };

        if link.paw != reporter {
            warn!(
                link_id = %link.id,
                owner = %link.paw,
                paw = %reporter,
                "Result reported by an agent that does not own the link"
            );
        }

        let status = result.link_status();
        let has_output = result.has_output();
        let reported_time = result.reported_time();
        let mut late_output = false;
        let updated = self
            .store
            .modify_link(&link.id, &mut |l| {
                if l.status.is_terminal() {
                    // A late result may still carry the only copy of the output.
                    late_output = has_output && !l.output;
                    return false;
                }
                l.pid = Some(result.pid);
                l.finish = Some(Utc::now());
                l.status = status;
                if reported_time.is_some() {
                    l.agent_reported_time = reported_time;
                }
                true
            })
            .await;

        let mut link = match updated {
            Ok(Some(link)) => link,
            Ok(None) if late_output => {
                if self.write_blob(&link.id, &result.output, &result).await {
                    self.mark_output(&link.id).await;
                    debug!(link_id = %link.id, "Stored output for an already finished link");
                }
                return ApplyOutcome::AlreadyFinished;
            }
            Ok(None) => {
                debug!(link_id = %link.id, "Link already finished, result ignored");
                return ApplyOutcome::AlreadyFinished;
            }
            Err(e) => {
                error!(link_id = %link.id, error = %e, "Failed to apply result");
                return ApplyOutcome::UnknownLink;
            }
        };

        let operation = self.owning_operation(&link).await;
        if has_output {
            let output = self.postprocess(&link, &result.output);
            if self.write_blob(&link.id, &output, &result).await
                && let Some(marked) = self.mark_output(&link.id).await
            {
                link = marked;
            }
            self.dispatch_learning(&link, &output, operation.clone());
        }

        debug!(link_id = %link.id, status = %link.status, "Result applied");
        let access = operation.map(|op| op.access).unwrap_or_default();
        ApplyOutcome::Applied { link, access }
    }

    async fn owning_operation(&self, link: &Link) -> Option<Operation> {
        let id = link.operation.as_deref()?;
        match self.store.find_operation(id).await {
            Ok(op) => op,
            Err(e) => {
                warn!(link_id = %link.id, operation = %id, error = %e, "Operation lookup failed");
                None
            }
        }
    }

    /// Run the ability's output hook for this executor, if one is registered.
    /// Returns base64 output; the original is kept when the hook fails.
    fn postprocess(&self, link: &Link, output: &str) -> String {
        let Some(hook) = self.hooks.get(link.ability_id(), &link.executor.name) else {
            return output.to_string();
        };
        let processed = encoding::decode_raw(output)
            .map_err(|e| e.to_string())
            .and_then(|raw| hook.postprocess(&raw).map_err(|e| e.to_string()));
        match processed {
            Ok(bytes) => encoding::encode_bytes(&bytes),
            Err(reason) => {
                error!(link_id = %link.id, executor = %link.executor.name, %reason, "Output hook failed");
                output.to_string()
            }
        }
    }

    /// Store the result file. Output that is not base64 is kept as sent.
    async fn write_blob(&self, link_id: &str, output: &str, result: &LinkResult) -> bool {
        let blob = CommandResults::from_reported(output, &result.stderr, result.exit_code.clone())
            .encode();
        let blob = match blob {
            Ok(blob) => blob,
            Err(e) => {
                error!(link_id, error = %e, "Could not encode result file");
                return false;
            }
        };
        match self.results.write_result_file(link_id, &blob).await {
            Ok(()) => true,
            Err(e) => {
                error!(link_id, error = %e, "Failed to write result file");
                false
            }
        }
    }

    /// Flag the link as having a readable result file.
    async fn mark_output(&self, link_id: &str) -> Option<Link> {
        let marked = self
            .store
            .modify_link(link_id, &mut |l| {
                if l.output {
                    return false;
                }
                l.output = true;
                true
            })
            .await;
        match marked {
            Ok(link) => link,
            Err(e) => {
                error!(link_id, error = %e, "Failed to flag link output");
                None
            }
        }
    }

    fn dispatch_learning(&self, link: &Link, output: &str, operation: Option<Operation>) {
        let route = learning_route(link, operation.as_ref());
        if route == LearningRoute::Skip {
            return;
        }
        let text = encoding::decode_or_raw(output);

        let processor = self.clone();
        let link = link.clone();
        tokio::spawn(async move {
            let learned = processor.learn(route, &link, &text, operation.as_ref()).await;
            match learned {
                Ok(facts) if facts.is_empty() => {}
                Ok(facts) => match processor.store.store_facts(facts).await {
                    Ok(added) => debug!(link_id = %link.id, added, "Facts stored"),
                    Err(e) => error!(link_id = %link.id, error = %e, "Failed to store facts"),
                },
                Err(e) => error!(link_id = %link.id, ?route, error = %e, "Learning failed"),
            }
        });
    }

    async fn learn(
        &self,
        route: LearningRoute,
        link: &Link,
        output: &str,
        operation: Option<&Operation>,
    ) -> redline_core::Result<Vec<Fact>> {
        match route {
            LearningRoute::AgentFacts => {
                let Some(learner) = &self.learner else {
                    return Ok(Vec::new());
                };
                let facts = self.store.facts_by_agent(&link.paw).await?;
                Ok(learner.learn(&facts, link, output, None).await?)
            }
            LearningRoute::ParseWithoutOperation | LearningRoute::ParseWithOperation => {
                let Some(parser) = &self.parser else {
                    return Ok(Vec::new());
                };
                Ok(parser.parse(link, output, operation).await?)
            }
            LearningRoute::OperationFacts => {
                let (Some(learner), Some(op)) = (&self.learner, operation) else {
                    return Ok(Vec::new());
                };
                let facts = self.store.all_facts(op).await?;
                Ok(learner.learn(&facts, link, output, Some(op)).await?)
            }
            LearningRoute::Skip => Ok(Vec::new()),
        }
    }
}
