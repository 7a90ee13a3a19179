use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::snapshot::Snapshot;
use crate::store::{self, BatchWriter};
use crate::zabbix::ZabbixApi;

/// Totals for one pipeline run across both record streams.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunSummary {
    /// Batch write requests issued.
    pub writes: u32,
    /// Capacity units consumed by the store.
    pub items: f64,
}

/// Execute one poll-merge-persist cycle.
///
/// A host fetch failure does not fail the run: a sentinel record for the
/// server itself is persisted instead, so the dashboard sees the outage.
/// A trigger fetch failure degrades to an availability-only snapshot.
/// Persistence failures do fail the run.
pub async fn run_once<A, W>(api: &A, writer: Arc<W>, cfg: &Config) -> Result<RunSummary>
where
    A: ZabbixApi,
    W: BatchWriter + 'static,
{
    let mut snapshot = Snapshot::new();

    match api.fetch_hosts().await {
        Ok(hosts) => {
            info!(hosts = hosts.len(), "fetched monitored hosts");
            snapshot.ingest_hosts(&hosts);

            match api.fetch_triggers().await {
                Ok(triggers) => {
                    info!(triggers = triggers.len(), "fetched active triggers");
                    snapshot
                        .merge_triggers(&triggers)
                        .context("merging triggers into snapshot")?;
                }
                Err(e) => {
                    warn!(error = %e, "trigger fetch failed, snapshot degrades to availability only");
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "host fetch failed, recording sentinel for the server itself");
            snapshot.record_fetch_failure(&cfg.zabbix.own_hostid, &e);
        }
    }

    let (hosts, events) = snapshot.into_records();

    let host_records = hosts
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .context("serializing host records")?;

    let event_records = events
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .context("serializing event records")?;

    let (host_outcome, event_outcome) = tokio::try_join!(
        store::persist(Arc::clone(&writer), &cfg.store.hosts_table, host_records),
        store::persist(Arc::clone(&writer), &cfg.store.events_table, event_records),
    )
    .context("persisting snapshot")?;

    let summary = RunSummary {
        writes: host_outcome.writes + event_outcome.writes,
        items: host_outcome.capacity_units + event_outcome.capacity_units,
    };

    info!(
        hosts = hosts.len(),
        events = events.len(),
        writes = summary.writes,
        items = summary.items,
        "pipeline run complete"
    );

    Ok(summary)
}
