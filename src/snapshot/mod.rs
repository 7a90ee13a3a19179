use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};
use serde::Serialize;

use crate::zabbix::{FetchError, RawHost, RawTrigger};

/// Availability flag value Zabbix reports for an unreachable agent.
const AGENT_UNAVAILABLE: &str = "2";

/// Per-host status derived from agent availability and active triggers.
///
/// Persisted as the numeric HTTP-style codes the dashboard reads:
/// 200 (OK), 500 (PROBLEM), 503 (OFFLINE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u16")]
pub enum HostStatus {
    Ok,
    Problem,
    Offline,
}

impl From<HostStatus> for u16 {
    fn from(status: HostStatus) -> Self {
        match status {
            HostStatus::Ok => 200,
            HostStatus::Problem => 500,
            HostStatus::Offline => 503,
        }
    }
}

/// Event classification, serialized as the wire vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    #[serde(rename = "agent:zabbix")]
    AgentZabbix,
    #[serde(rename = "agent:jmx")]
    AgentJmx,
    #[serde(rename = "agent:snmp")]
    AgentSnmp,
    #[serde(rename = "trigger")]
    Trigger,
    #[serde(rename = "api")]
    Api,
    #[serde(rename = "api:io")]
    ApiIo,
}

/// One observation attached to a host at snapshot time.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub eventid: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub message: String,
    pub timestamp: i64,
    /// Copied from the owning host when the event is created.
    pub maintenance: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggerid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged: Option<bool>,
}

/// One monitored host's status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Host {
    pub hostid: String,
    pub name: String,
    pub status: HostStatus,
    pub severity: u8,
    pub timestamp: i64,
    pub maintenance: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintenance_from: Option<i64>,
    /// Detached into a separate record stream before persistence.
    #[serde(skip)]
    pub events: Vec<Event>,
}

/// Produces run-unique event identifiers.
///
/// Ids embed wall-clock milliseconds plus a run-local counter, so two ids
/// generated within the same millisecond are still distinct.
#[derive(Debug, Default)]
pub struct EventIdGenerator {
    counter: u64,
}

impl EventIdGenerator {
    /// Returns the next identifier, e.g. "E:1695400000123:7".
    pub fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("E:{}:{}", unix_now_millis(), self.counter)
    }
}

/// Run-local snapshot under construction: the host map plus the id
/// generator scoped to this pipeline run.
#[derive(Debug, Default)]
pub struct Snapshot {
    hosts: HashMap<String, Host>,
    ids: EventIdGenerator,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of hosts currently in the snapshot.
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Look up a host by id.
    pub fn host(&self, hostid: &str) -> Option<&Host> {
        self.hosts.get(hostid)
    }

    /// Build Host entities from raw host records and add them to the map.
    pub fn ingest_hosts(&mut self, records: &[RawHost]) {
        for record in records {
            let host = self.build_host(record);
            self.hosts.insert(host.hostid.clone(), host);
        }
    }

    /// Convert one raw host record into a normalized Host.
    ///
    /// Status starts OK; any unreachable sub-agent flips it to OFFLINE and
    /// appends one availability event, in the fixed order zabbix, jmx, snmp.
    fn build_host(&mut self, record: &RawHost) -> Host {
        let maintenance = record.maintenance_status == "1";

        let mut host = Host {
            hostid: record.hostid.clone(),
            name: record.host.clone(),
            status: HostStatus::Ok,
            severity: 0,
            timestamp: unix_now(),
            maintenance,
            maintenance_from: maintenance.then(|| parse_epoch(&record.maintenance_from)),
            events: Vec::new(),
        };

        let agents = [
            (&record.available, EventKind::AgentZabbix, &record.error, &record.errors_from),
            (&record.jmx_available, EventKind::AgentJmx, &record.jmx_error, &record.jmx_errors_from),
            (&record.snmp_available, EventKind::AgentSnmp, &record.snmp_error, &record.snmp_errors_from),
        ];

        for (available, kind, error, errors_from) in agents {
            if available != AGENT_UNAVAILABLE {
                continue;
            }

            host.status = HostStatus::Offline;
            host.events.push(Event {
                eventid: self.ids.next_id(),
                kind,
                message: error.clone(),
                timestamp: parse_epoch(errors_from),
                maintenance: host.maintenance,
                triggerid: None,
                severity: None,
                acknowledged: None,
            });
        }

        host
    }

    /// Fold active triggers into the host map.
    pub fn merge_triggers(&mut self, triggers: &[RawTrigger]) -> Result<()> {
        for trigger in triggers {
            self.merge_trigger(trigger)?;
        }
        Ok(())
    }

    /// Fold one trigger into each host it affects.
    ///
    /// A trigger referencing a host id absent from the map is a data
    /// consistency fault and fails the merge.
    pub fn merge_trigger(&mut self, trigger: &RawTrigger) -> Result<()> {
        let severity = parse_severity(&trigger.priority);
        let acknowledged = trigger
            .last_event
            .as_ref()
            .map(|e| e.acknowledged == "1")
            .unwrap_or(false);

        for host_ref in &trigger.hosts {
            let eventid = self.ids.next_id();

            let Some(host) = self.hosts.get_mut(&host_ref.hostid) else {
                bail!(
                    "trigger {} references unknown host {}",
                    trigger.triggerid,
                    host_ref.hostid
                );
            };

            host.events.push(Event {
                eventid,
                kind: EventKind::Trigger,
                message: trigger.description.clone(),
                timestamp: parse_epoch(&trigger.lastchange),
                maintenance: host.maintenance,
                triggerid: Some(trigger.triggerid.clone()),
                severity: Some(severity),
                acknowledged: Some(acknowledged),
            });

            // OFFLINE is never downgraded to PROBLEM.
            if host.status == HostStatus::Ok {
                host.status = HostStatus::Problem;
            }
            host.severity = host.severity.max(severity);
        }

        Ok(())
    }

    /// Record a sentinel host describing a failed host fetch, so the
    /// persistence stage always has something to write.
    pub fn record_fetch_failure(&mut self, own_hostid: &str, err: &FetchError) {
        let now = unix_now();

        let (kind, message) = match err {
            FetchError::Api {
                code,
                message,
                data,
            } => (EventKind::Api, format!("[{code}] {message} {data}")),
            other => (EventKind::ApiIo, other.to_string()),
        };

        let event = Event {
            eventid: self.ids.next_id(),
            kind,
            message,
            timestamp: now,
            maintenance: false,
            triggerid: None,
            severity: None,
            acknowledged: None,
        };

        self.hosts.insert(
            own_hostid.to_string(),
            Host {
                hostid: own_hostid.to_string(),
                name: String::new(),
                status: HostStatus::Offline,
                severity: 0,
                timestamp: now,
                maintenance: false,
                maintenance_from: None,
                events: vec![event],
            },
        );
    }

    /// Consume the snapshot, detaching events from their hosts into a flat
    /// collection so the two record streams can be persisted independently.
    pub fn into_records(self) -> (Vec<Host>, Vec<Event>) {
        let mut hosts = Vec::with_capacity(self.hosts.len());
        let mut events = Vec::new();

        for mut host in self.hosts.into_values() {
            events.append(&mut host.events);
            hosts.push(host);
        }

        (hosts, events)
    }
}

/// Current time as seconds since the epoch.
fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Current time as milliseconds since the epoch.
fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Parse a Zabbix epoch-seconds string. Upstream supplies well-formed
/// numeric strings; anything else degrades to 0 rather than failing the run.
fn parse_epoch(s: &str) -> i64 {
    s.trim().parse().unwrap_or(0)
}

/// Parse a trigger priority string, clamping unknown input to 0.
fn parse_severity(s: &str) -> u8 {
    s.trim().parse().unwrap_or(0)
}
