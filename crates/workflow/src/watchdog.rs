//! Link and agent watchdog.
//!
//! A collected link whose agent never reports back would sit in EXECUTE
//! forever. The watchdog times such links out once the executor's timeout
//! plus a grace period has elapsed since collection, and marks agents that
//! have been silent past the untrusted timer plus their own `sleep_max` as
//! untrusted. Such agents regain trust on their next beacon.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redline_config::WatchdogConfig;
use redline_core::error::StoreError;
use redline_core::{Access, DataStore, DomainEvent, EventBus, Link, LinkStatus};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// What a sweep changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub timed_out: Vec<String>,
    pub untrusted: Vec<String>,
}

pub struct Watchdog {
    store: Arc<dyn DataStore>,
    events: Arc<EventBus>,
    config: WatchdogConfig,
    untrusted_timer: Duration,
}

impl Watchdog {
    pub fn new(
        store: Arc<dyn DataStore>,
        events: Arc<EventBus>,
        config: WatchdogConfig,
        untrusted_timer: Duration,
    ) -> Self {
        Self {
            store,
            events,
            config,
            untrusted_timer,
        }
    }

    /// Sweep every `interval_secs` until the task is aborted.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match self.sweep(Utc::now()).await {
                    Ok(report) if report == SweepReport::default() => {}
                    Ok(report) => debug!(
                        timed_out = report.timed_out.len(),
                        untrusted = report.untrusted.len(),
                        "Watchdog sweep"
                    ),
                    Err(e) => error!(error = %e, "Watchdog sweep failed"),
                }
            }
        })
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();

        for link in self.store.all_links().await? {
            if self.overdue(&link, now)
                && let Some(link) = self.time_out(&link.id, now).await?
            {
                self.link_timed_out(&link).await;
                report.timed_out.push(link.id);
            }
        }

        for agent in self.store.agents().await? {
            let silent = u64::try_from((now - agent.last_seen).num_seconds()).unwrap_or(0);
            let limit = self
                .untrusted_timer
                .as_secs()
                .saturating_add(u64::from(agent.sleep_max));
            if agent.trusted && silent > limit {
                self.store
                    .modify_agent(&agent.paw, &mut |a| {
                        a.trusted = false;
                        a.silenced = true;
                    })
                    .await?;
                warn!(paw = %agent.paw, last_seen = %agent.last_seen, "Agent untrusted after going silent");
                report.untrusted.push(agent.paw);
            }
        }

        Ok(report)
    }

    fn deadline(&self, link: &Link) -> Option<DateTime<Utc>> {
        let allowed = link.executor.timeout.saturating_add(self.config.link_grace_secs);
        let allowed = chrono::Duration::try_seconds(i64::try_from(allowed).ok()?)?;
        link.collect?.checked_add_signed(allowed)
    }

    fn overdue(&self, link: &Link, now: DateTime<Utc>) -> bool {
        link.status == LinkStatus::Execute
            && link.finish.is_none()
            && self.deadline(link).is_some_and(|deadline| now > deadline)
    }

    /// TIMEOUT the link unless a result landed since it was read.
    async fn time_out(&self, link_id: &str, now: DateTime<Utc>) -> Result<Option<Link>, StoreError> {
        self.store
            .modify_link(link_id, &mut |l| {
                if l.status != LinkStatus::Execute || l.finish.is_some() {
                    return false;
                }
                l.status = LinkStatus::Timeout;
                l.finish = Some(now);
                true
            })
            .await
    }

    async fn link_timed_out(&self, link: &Link) {
        warn!(link_id = %link.id, paw = %link.paw, "Link timed out");
        let access = match &link.operation {
            Some(id) => match self.store.find_operation(id).await {
                Ok(Some(op)) => op.access,
                Ok(None) => Access::default(),
                Err(e) => {
                    error!(link_id = %link.id, error = %e, "Operation lookup failed");
                    Access::default()
                }
            },
            None => Access::default(),
        };
        self.events.fire_event(DomainEvent::LinkCompleted {
            paw: link.paw.clone(),
            link_id: link.id.clone(),
            pid: link.pid.unwrap_or_default(),
            status: LinkStatus::Timeout.code(),
            access,
            timestamp: Utc::now(),
        });
    }
}
