//! Periodic re-check of every authenticated connection against the
//! membership provider.
//!
//! The sweep fails open: only a confirmed inactive membership evicts a
//! connection. Errors and timeouts leave it connected until the next cycle.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::gateway::events::CLOSE_SUBSCRIPTION_EXPIRED;
use crate::gateway::registry::ConnectionRegistry;
use crate::provider::credential::CredentialManager;
use crate::provider::{with_timeout, MembershipProvider};

use super::scheduler::ScheduledTask;

const EXPIRED_REASON: &str = "Subscription expired or no longer active.";

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections whose status was looked up.
    pub checked: usize,
    /// Connections closed with 4002.
    pub evicted: usize,
    /// Dead connections dropped from the registry without a lookup.
    pub pruned: usize,
    /// Lookups that errored or timed out.
    pub failed: usize,
    /// The service credential could not be refreshed and the cycle stopped.
    pub aborted: bool,
}

pub struct Revalidator {
    registry: Arc<ConnectionRegistry>,
    provider: Arc<dyn MembershipProvider>,
    credentials: Arc<CredentialManager>,
    check_timeout: Duration,
}

impl Revalidator {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        provider: Arc<dyn MembershipProvider>,
        credentials: Arc<CredentialManager>,
        check_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            provider,
            credentials,
            check_timeout,
        }
    }

    /// Run one cycle over a snapshot of the authenticated connections.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let sessions = self.registry.snapshot_authenticated();
        if sessions.is_empty() {
            debug!("revalidation: no authenticated connections");
            return report;
        }

        for session in sessions {
            if session.handle.is_closed() {
                self.registry.remove_by_handle(session.handle.id());
                report.pruned += 1;
                continue;
            }

            // Re-checked before every lookup: a long cycle can cross the refresh margin.
            let service_credential = match self.credentials.current().await {
                Ok(credential) => credential,
                Err(err) => {
                    error!(error = %err, "revalidation aborted: service credential unavailable");
                    report.aborted = true;
                    break;
                }
            };

            report.checked += 1;
            let lookup = with_timeout(
                self.check_timeout,
                self.provider.fetch_member_status(&session.key, &service_credential),
            )
            .await;

            match lookup {
                Ok(Some(status)) if status.is_active() => {}
                Ok(status) => {
                    info!(user_id = %session.key, ?status, "membership no longer active, evicting");
                    session.handle.terminate(CLOSE_SUBSCRIPTION_EXPIRED, EXPIRED_REASON);
                    self.registry.remove_by_handle(session.handle.id());
                    report.evicted += 1;
                }
                Err(err) => {
                    warn!(
                        user_id = %session.key,
                        error = %err,
                        "membership check failed, keeping connection"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            checked = report.checked,
            evicted = report.evicted,
            pruned = report.pruned,
            failed = report.failed,
            aborted = report.aborted,
            "revalidation sweep finished"
        );
        report
    }

    /// Sweep every `interval` until the returned task is stopped.
    pub fn start(self: Arc<Self>, interval: Duration) -> ScheduledTask {
        ScheduledTask::spawn("revalidation", interval, move || {
            let revalidator = self.clone();
            async move {
                revalidator.sweep().await;
            }
        })
    }
}
