//! Automatic clearing of capacity alarms.
//!
//! A `NOSPACE` alarm is only cleared once every member is back under
//! `db_quota_bytes * disalarm_threshold`. Other alarm kinds are reported and
//! left for an operator.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::DefragConfig;
use crate::error::{DefragError, Result};
use crate::service::{with_timeout, AlarmKind, AlarmMember, ClusterService, EndpointStatus};

/// What [`auto_disalarm`] did. Declining to clear is not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DisalarmOutcome {
    /// No capacity alarm was active.
    NoAlarms,
    /// At least one member is still above the threshold; nothing was cleared.
    AboveThreshold {
        /// Endpoints whose size exceeds the threshold.
        endpoints: Vec<String>,
    },
    /// Capacity alarms were cleared.
    Cleared {
        /// Alarms that were deactivated.
        cleared: Vec<AlarmMember>,
        /// Active alarms of other kinds, left untouched.
        ignored: Vec<AlarmMember>,
    },
}

/// Endpoints whose database size is strictly greater than
/// `db_quota_bytes * threshold`.
pub fn endpoints_above_threshold(
    statuses: &[EndpointStatus],
    db_quota_bytes: u64,
    threshold: f64,
) -> Vec<String> {
    let limit = db_quota_bytes as f64 * threshold;
    statuses
        .iter()
        .filter(|s| s.db_size as f64 > limit)
        .map(|s| s.endpoint.clone())
        .collect()
}

/// Clear active `NOSPACE` alarms if every member is safely under quota.
///
/// `endpoints` is the connection set used for the cluster-wide alarm calls;
/// `statuses` must already be collected.
pub async fn auto_disalarm(
    config: &DefragConfig,
    cluster: &dyn ClusterService,
    endpoints: &[String],
    statuses: &[EndpointStatus],
) -> Result<DisalarmOutcome> {
    let timeout = config.command_timeout;
    let alarms = with_timeout("alarm list", timeout, cluster.list_alarms(endpoints))
        .await
        .map_err(DefragError::Alarm)?;

    let (nospace, ignored): (Vec<AlarmMember>, Vec<AlarmMember>) = alarms
        .into_iter()
        .partition(|a| a.kind == AlarmKind::NoSpace);

    for alarm in &ignored {
        warn!(
            "alarm {} on member {:x} will not be cleared automatically",
            alarm.kind, alarm.member_id
        );
    }

    if nospace.is_empty() {
        info!("No NOSPACE alarm is active");
        return Ok(DisalarmOutcome::NoAlarms);
    }

    let above = endpoints_above_threshold(statuses, config.db_quota_bytes, config.disalarm_threshold);
    if !above.is_empty() {
        warn!(
            "not clearing NOSPACE alarm(s): {} endpoint(s) above {:.0}% of quota: {}",
            above.len(),
            config.disalarm_threshold * 100.0,
            above.join(", ")
        );
        return Ok(DisalarmOutcome::AboveThreshold { endpoints: above });
    }

    let mut cleared = Vec::with_capacity(nospace.len());
    for alarm in nospace {
        with_timeout("alarm clear", timeout, cluster.clear_alarm(endpoints, &alarm))
            .await
            .map_err(DefragError::Alarm)?;
        info!("Cleared alarm {} on member {:x}", alarm.kind, alarm.member_id);
        cleared.push(alarm);
    }

    Ok(DisalarmOutcome::Cleared { cleared, ignored })
}
