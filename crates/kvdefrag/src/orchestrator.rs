//! Maintenance orchestrator.
//!
//! One pass: resolve endpoints, health-check every member, collect status,
//! order the leader last, optionally compact, then walk the endpoints one at
//! a time through evaluate, leader hand-off, defragment and verify.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DefragConfig;
use crate::disalarm::{self, DisalarmOutcome};
use crate::endpoints;
use crate::error::{DefragError, Result};
use crate::health::{self, HealthReport};
use crate::rule::{self, Rule};
use crate::service::{with_timeout, ClusterService, EndpointStatus, NameService};
use crate::status;

/// Run-level stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunPhase {
    Idle,
    Resolving,
    HealthChecking,
    Collecting,
    Compacting,
    PerEndpointLoop,
    Reporting,
}

/// Per-endpoint stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndpointPhase {
    Pending,
    Evaluated,
    LeaderTransfer,
    Defragmenting,
    Verifying,
    Done,
    Skipped,
    Failed,
}

impl EndpointPhase {
    /// Whether `self -> next` is a legal step.
    pub fn can_transition_to(self, next: EndpointPhase) -> bool {
        use EndpointPhase::*;
        matches!(
            (self, next),
            (Pending, Evaluated)
                | (Evaluated, Skipped)
                | (Evaluated, LeaderTransfer)
                | (Evaluated, Defragmenting)
                | (LeaderTransfer, Defragmenting)
                | (Defragmenting, Verifying)
                | (Verifying, Done)
                | (Pending | Evaluated | LeaderTransfer | Defragmenting | Verifying, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EndpointPhase::Done | EndpointPhase::Skipped | EndpointPhase::Failed
        )
    }
}

impl fmt::Display for EndpointPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Terminal result for one endpoint.
#[derive(Debug)]
pub enum EndpointOutcome {
    Skipped(String),
    Succeeded,
    Failed(DefragError),
}

impl EndpointOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, EndpointOutcome::Failed(_))
    }
}

/// Progress of one endpoint through the loop.
#[derive(Debug)]
pub struct EndpointReport {
    pub endpoint: String,
    pub phase: EndpointPhase,
    /// `None` while the endpoint was never reached.
    pub outcome: Option<EndpointOutcome>,
}

impl EndpointReport {
    fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            phase: EndpointPhase::Pending,
            outcome: None,
        }
    }

    fn advance(&mut self, next: EndpointPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(DefragError::InvalidTransition {
                endpoint: self.endpoint.clone(),
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        debug!("{}: {} -> {}", self.endpoint, self.phase, next);
        self.phase = next;
        Ok(())
    }
}

/// Aggregate result of a run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Endpoints in processing (leader-last) order.
    pub endpoints: Vec<EndpointReport>,
    pub failures: usize,
    pub total: usize,
    pub disalarm: Option<DisalarmOutcome>,
    pub disalarm_error: Option<DefragError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures == 0 && self.disalarm_error.is_none()
    }

    pub fn report(&self, endpoint: &str) -> Option<&EndpointReport> {
        self.endpoints.iter().find(|r| r.endpoint == endpoint)
    }

    /// Endpoints that reached a terminal phase.
    pub fn processed(&self) -> usize {
        self.endpoints.iter().filter(|r| r.phase.is_terminal()).count()
    }
}

pub struct Orchestrator {
    config: DefragConfig,
    cluster: Arc<dyn ClusterService>,
    names: Arc<dyn NameService>,
    phase: RunPhase,
}

impl Orchestrator {
    pub fn new(
        config: DefragConfig,
        cluster: Arc<dyn ClusterService>,
        names: Arc<dyn NameService>,
    ) -> Self {
        Self {
            config,
            cluster,
            names,
            phase: RunPhase::Idle,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!("run phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Execute one maintenance pass.
    ///
    /// Resolution, health-check and status-collection failures abort with an
    /// error before anything is mutated. Per-endpoint failures are counted in
    /// the returned report.
    pub async fn run(&mut self) -> Result<RunReport> {
        rule::validate_rule(&self.config.defrag_rule)?;
        let rule = rule::parse_optional(&self.config.defrag_rule)?;
        let timeout = self.config.command_timeout;

        self.enter(RunPhase::Resolving);
        let targets =
            endpoints::resolve(&self.config, self.cluster.as_ref(), self.names.as_ref()).await?;
        let health_targets = endpoints::resolve_for_health_check(
            &self.config,
            self.cluster.as_ref(),
            self.names.as_ref(),
        )
        .await?;

        self.enter(RunPhase::HealthChecking);
        let health = self.health_check(&health_targets).await?;

        self.enter(RunPhase::Collecting);
        let statuses = status::collect_status(self.cluster.as_ref(), &targets, timeout).await?;
        let ordered = endpoints::order_with_leader_last(&targets, &statuses);

        if self.config.compaction && !self.config.dry_run {
            self.enter(RunPhase::Compacting);
            self.compact(&ordered, &statuses).await;
        }

        self.enter(RunPhase::PerEndpointLoop);
        let mut report = RunReport {
            endpoints: ordered.iter().map(|ep| EndpointReport::new(ep)).collect(),
            total: ordered.len(),
            ..RunReport::default()
        };

        for entry in report.endpoints.iter_mut() {
            let outcome = match self.process_endpoint(entry, rule.as_ref(), &targets).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    if !entry.phase.is_terminal() {
                        entry.phase = EndpointPhase::Failed;
                    }
                    warn!("{}", e);
                    EndpointOutcome::Failed(e)
                }
            };
            let failed = outcome.is_failure();
            entry.outcome = Some(outcome);

            if failed {
                report.failures += 1;
                if !self.config.continue_on_error {
                    break;
                }
            }
        }

        if self.config.auto_disalarm && !self.config.dry_run && health.saw_nospace_alarm() {
            match self.disalarm(&health_targets).await {
                Ok(outcome) => report.disalarm = Some(outcome),
                Err(e) => {
                    warn!("auto disalarm failed: {}", e);
                    report.disalarm_error = Some(e);
                }
            }
        }

        self.enter(RunPhase::Reporting);
        if report.failures > 0 {
            warn!(
                "{} (total {}) endpoint(s) failed to be defragmented.",
                report.failures, report.total
            );
        } else {
            info!("The defragmentation is successful.");
        }

        Ok(report)
    }

    async fn health_check(&self, targets: &[String]) -> Result<HealthReport> {
        let report =
            health::probe_all(Arc::clone(&self.cluster), targets, self.config.command_timeout).await;
        for record in &report.records {
            info!("{}", record);
        }
        if !report.is_healthy() {
            return Err(DefragError::HealthCheck {
                unhealthy: report.unhealthy_count(),
                total: report.records.len(),
            });
        }
        Ok(report)
    }

    /// Best-effort physical compaction at the highest observed revision.
    async fn compact(&self, ordered: &[String], statuses: &[EndpointStatus]) {
        let (Some(endpoint), Some(revision)) = (ordered.first(), status::max_revision(statuses))
        else {
            return;
        };
        if revision <= 0 {
            debug!("nothing to compact");
            return;
        }

        info!("Running compaction until revision: {} ...", revision);
        let result = with_timeout(
            "compaction",
            self.config.command_timeout,
            self.cluster.compact(endpoint, revision),
        )
        .await;
        match result {
            Ok(()) => info!("compacted with revision {}", revision),
            Err(source) => warn!(
                "{}",
                DefragError::Compaction {
                    endpoint: endpoint.clone(),
                    revision,
                    source,
                }
            ),
        }
    }

    async fn process_endpoint(
        &self,
        entry: &mut EndpointReport,
        rule: Option<&Rule>,
        bootstrap: &[String],
    ) -> Result<EndpointOutcome> {
        let timeout = self.config.command_timeout;
        let endpoint = entry.endpoint.clone();

        let before = status::fetch_status(self.cluster.as_ref(), &endpoint, timeout).await?;
        let decision = rule::decide(rule, &before, self.config.db_quota_bytes)?;
        entry.advance(EndpointPhase::Evaluated)?;

        if !decision.eligible {
            info!("Evaluation result is false, so skipping endpoint: {}", endpoint);
            entry.advance(EndpointPhase::Skipped)?;
            let reason = decision
                .reason
                .unwrap_or_else(|| "rule evaluated to false".to_string());
            return Ok(EndpointOutcome::Skipped(reason));
        }
        if self.config.dry_run {
            info!("[Dry run] skip defragmenting endpoint {:?}", endpoint);
            entry.advance(EndpointPhase::Skipped)?;
            return Ok(EndpointOutcome::Skipped("dry run".to_string()));
        }

        if self.config.move_leader && before.is_leader() {
            entry.advance(EndpointPhase::LeaderTransfer)?;
            self.move_leader(&endpoint, &before, bootstrap).await?;
        }

        entry.advance(EndpointPhase::Defragmenting)?;
        info!("Defragmenting endpoint {:?}", endpoint);
        with_timeout("defragment", timeout, self.cluster.defragment(&endpoint))
            .await
            .map_err(|source| DefragError::Defragment {
                endpoint: endpoint.clone(),
                source,
            })?;

        entry.advance(EndpointPhase::Verifying)?;
        let after = with_timeout("status", timeout, self.cluster.status(&endpoint))
            .await
            .map_err(|source| DefragError::Verification {
                endpoint: endpoint.clone(),
                source,
            })?;
        info!("Finished defragmenting endpoint {:?}", endpoint);
        info!("{}", after);

        entry.advance(EndpointPhase::Done)?;
        Ok(EndpointOutcome::Succeeded)
    }

    /// Hand leadership from the member behind `endpoint` to the first
    /// voting member with a different ID.
    async fn move_leader(
        &self,
        endpoint: &str,
        leader: &EndpointStatus,
        bootstrap: &[String],
    ) -> Result<()> {
        let timeout = self.config.command_timeout;
        let members = with_timeout("member list", timeout, self.cluster.list_members(bootstrap))
            .await
            .map_err(DefragError::MembershipQuery)?;

        if members.len() <= 1 {
            info!("Only one member in the cluster, no leadership to hand off");
            return Ok(());
        }

        let target = members
            .iter()
            .find(|m| !m.is_learner && m.id != leader.leader_id)
            .ok_or_else(|| DefragError::LeaderTransfer {
                leader: leader.leader_id,
                reason: "no follower to hand the leadership to".to_string(),
            })?;

        info!(
            "Moving leadership from {:x} to {:x} ({})",
            leader.leader_id, target.id, target.name
        );
        with_timeout(
            "transfer leadership",
            timeout,
            self.cluster.transfer_leadership(endpoint, target.id),
        )
        .await
        .map_err(|e| DefragError::LeaderTransfer {
            leader: leader.leader_id,
            reason: e.to_string(),
        })
    }

    async fn disalarm(&self, targets: &[String]) -> Result<DisalarmOutcome> {
        let fresh =
            status::collect_status(self.cluster.as_ref(), targets, self.config.command_timeout)
                .await?;
        disalarm::auto_disalarm(&self.config, self.cluster.as_ref(), targets, &fresh).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{member, status, StubCluster, StubNames};

    #[test]
    fn test_endpoint_phase_happy_path() {
        use EndpointPhase::*;
        assert!(Pending.can_transition_to(Evaluated));
        assert!(Evaluated.can_transition_to(LeaderTransfer));
        assert!(Evaluated.can_transition_to(Defragmenting));
        assert!(LeaderTransfer.can_transition_to(Defragmenting));
        assert!(Defragmenting.can_transition_to(Verifying));
        assert!(Verifying.can_transition_to(Done));
    }

    #[test]
    fn test_endpoint_phase_rejects_shortcuts() {
        use EndpointPhase::*;
        assert!(!Pending.can_transition_to(Defragmenting));
        assert!(!Evaluated.can_transition_to(Verifying));
        assert!(!LeaderTransfer.can_transition_to(Skipped));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Skipped.can_transition_to(Evaluated));
    }

    #[test]
    fn test_advance_invalid_transition() {
        let mut entry = EndpointReport::new("a");
        let err = entry.advance(EndpointPhase::Done).unwrap_err();
        assert!(matches!(err, DefragError::InvalidTransition { .. }));
        assert_eq!(entry.phase, EndpointPhase::Pending);
    }

    fn single_member() -> (DefragConfig, StubCluster) {
        let ep = "http://10.0.0.1:2379";
        let mut stub = StubCluster::with_members(vec![member(1, &[ep], false)]);
        stub.statuses.insert(ep.to_string(), status(ep, 1, 1, 1000));
        let config = DefragConfig {
            endpoints: vec![ep.to_string()],
            move_leader: true,
            ..DefragConfig::default()
        };
        (config, stub)
    }

    #[tokio::test]
    async fn test_single_member_leader_is_defragmented() {
        let (config, stub) = single_member();
        let stub = Arc::new(stub);
        let mut orch = Orchestrator::new(config, stub.clone(), Arc::new(StubNames::default()));
        let report = orch.run().await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.endpoints[0].phase, EndpointPhase::Done);
        assert_eq!(stub.defragmented.lock().unwrap().len(), 1);
        assert_eq!(orch.phase(), RunPhase::Reporting);
    }

    #[tokio::test]
    async fn test_invalid_rule_aborts_before_resolving() {
        let (mut config, stub) = single_member();
        config.defrag_rule = "dbSize >".to_string();
        let mut orch = Orchestrator::new(config, Arc::new(stub), Arc::new(StubNames::default()));
        let err = orch.run().await.unwrap_err();
        assert!(matches!(err, DefragError::InvalidRule { .. }));
        assert_eq!(orch.phase(), RunPhase::Idle);
    }

    #[tokio::test]
    async fn test_rule_false_skips() {
        let (mut config, stub) = single_member();
        config.defrag_rule = "dbSize > dbQuota".to_string();
        let stub = Arc::new(stub);
        let mut orch = Orchestrator::new(config, stub.clone(), Arc::new(StubNames::default()));
        let report = orch.run().await.unwrap();
        assert!(report.is_success());
        assert!(matches!(
            report.endpoints[0].outcome,
            Some(EndpointOutcome::Skipped(_))
        ));
        assert!(stub.defragmented.lock().unwrap().is_empty());
    }
}
