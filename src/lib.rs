//! Zabbix availability watcher.
//!
//! One pipeline run polls a Zabbix server for monitored hosts and active
//! triggers, merges the two views into a per-host status snapshot with an
//! embedded event log, and persists the snapshot to DynamoDB in bounded
//! batch-write requests.

pub mod config;
pub mod pipeline;
pub mod snapshot;
pub mod store;
pub mod zabbix;
