use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::config::ZabbixConfig;

/// One monitored host as reported by `host.get`.
///
/// All fields are Zabbix-style strings; availability uses "2" for
/// unreachable and maintenance_status uses "1" for active maintenance.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawHost {
    pub hostid: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub maintenance_status: String,
    #[serde(default)]
    pub maintenance_from: String,
    #[serde(default)]
    pub available: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub errors_from: String,
    #[serde(default)]
    pub jmx_available: String,
    #[serde(default)]
    pub jmx_error: String,
    #[serde(default)]
    pub jmx_errors_from: String,
    #[serde(default)]
    pub snmp_available: String,
    #[serde(default)]
    pub snmp_error: String,
    #[serde(default)]
    pub snmp_errors_from: String,
}

/// One active trigger as reported by `trigger.get`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTrigger {
    pub triggerid: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub lastchange: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub hosts: Vec<TriggerHost>,
    #[serde(rename = "lastEvent", default)]
    pub last_event: Option<LastEvent>,
}

/// Host reference attached to a trigger.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerHost {
    pub hostid: String,
}

/// Most recent upstream event for a trigger ("1" means acknowledged).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LastEvent {
    #[serde(default)]
    pub eventid: String,
    #[serde(default)]
    pub acknowledged: String,
}

/// Fetch failure, split into the two kinds the pipeline reacts to.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Protocol-level error returned inside the JSON-RPC envelope.
    #[error("zabbix api error [{code}] {message} {data}")]
    Api {
        code: i64,
        message: String,
        data: String,
    },

    /// Transport or decoding failure below the protocol level.
    #[error("{0}")]
    Transport(String),

    /// Envelope carried neither a result nor an error member.
    #[error("zabbix response contained neither result nor error")]
    EmptyEnvelope,
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Zabbix API client trait.
pub trait ZabbixApi: Send + Sync {
    /// Fetch all monitored hosts with their per-agent availability.
    fn fetch_hosts(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<RawHost>, FetchError>> + Send;

    /// Fetch active triggers at or above the configured severity.
    fn fetch_triggers(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<RawTrigger>, FetchError>> + Send;
}

/// HTTP-based Zabbix JSON-RPC 2.0 client.
pub struct Client {
    http: reqwest::Client,
    endpoint: String,
    auth_token: String,
    min_severity: u8,
}

impl Client {
    /// Create a new Zabbix client.
    pub fn new(cfg: &ZabbixConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
            auth_token: cfg.auth_token.clone(),
            min_severity: cfg.min_severity,
        })
    }

    /// Perform one JSON-RPC call and unwrap the response envelope.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, FetchError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            auth: &self.auth_token,
            id: 1,
        };

        let envelope: RpcEnvelope<T> = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        if let Some(err) = envelope.error {
            return Err(FetchError::Api {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        envelope.result.ok_or(FetchError::EmptyEnvelope)
    }
}

impl ZabbixApi for Client {
    async fn fetch_hosts(&self) -> Result<Vec<RawHost>, FetchError> {
        debug!("fetching hosts");

        self.call(
            "host.get",
            json!({
                "with_items": true,
                "monitored_hosts": true,
            }),
        )
        .await
    }

    async fn fetch_triggers(&self) -> Result<Vec<RawTrigger>, FetchError> {
        debug!(min_severity = self.min_severity, "fetching triggers");

        self.call(
            "trigger.get",
            json!({
                "filter": { "value": 1 },
                "monitored": true,
                "min_severity": self.min_severity,
                "selectHosts": ["hostid", "host"],
                "selectLastEvent": ["eventid", "acknowledged"],
                "output": "extend",
                "expandDescription": true,
                "expandComment": true,
            }),
        )
        .await
    }
}

// --- JSON-RPC wire structures ---

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: serde_json::Value,
    auth: &'a str,
    id: u32,
}

#[derive(Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_with_result() {
        let body = r#"{
            "jsonrpc": "2.0",
            "result": [{"hostid": "10084", "host": "web-1", "available": "1"}],
            "id": 1
        }"#;

        let envelope: RpcEnvelope<Vec<RawHost>> =
            serde_json::from_str(body).expect("should parse");
        let hosts = envelope.result.expect("result should be present");
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].hostid, "10084");
        assert_eq!(hosts[0].host, "web-1");
        assert_eq!(hosts[0].available, "1");
        assert!(hosts[0].jmx_available.is_empty());
    }

    #[test]
    fn test_envelope_with_error() {
        let body = r#"{
            "jsonrpc": "2.0",
            "error": {"code": -32602, "message": "Invalid params.", "data": "Not authorised."},
            "id": 1
        }"#;

        let envelope: RpcEnvelope<Vec<RawHost>> =
            serde_json::from_str(body).expect("should parse");
        assert!(envelope.result.is_none());
        let err = envelope.error.expect("error should be present");
        assert_eq!(err.code, -32602);
        assert_eq!(err.message, "Invalid params.");
        assert_eq!(err.data, "Not authorised.");
    }

    #[test]
    fn test_trigger_decoding() {
        let body = r#"[{
            "triggerid": "13617",
            "description": "Disk full on web-1",
            "lastchange": "1695400000",
            "priority": "4",
            "hosts": [{"hostid": "10084", "host": "web-1"}],
            "lastEvent": {"eventid": "4711", "acknowledged": "1"}
        }]"#;

        let triggers: Vec<RawTrigger> = serde_json::from_str(body).expect("should parse");
        assert_eq!(triggers.len(), 1);
        let t = &triggers[0];
        assert_eq!(t.triggerid, "13617");
        assert_eq!(t.priority, "4");
        assert_eq!(t.hosts[0].hostid, "10084");
        let last = t.last_event.as_ref().expect("lastEvent should be present");
        assert_eq!(last.acknowledged, "1");
    }

    #[test]
    fn test_trigger_without_last_event() {
        let body = r#"[{"triggerid": "1", "description": "x", "lastchange": "0", "priority": "2"}]"#;
        let triggers: Vec<RawTrigger> = serde_json::from_str(body).expect("should parse");
        assert!(triggers[0].last_event.is_none());
        assert!(triggers[0].hosts.is_empty());
    }

    #[test]
    fn test_request_body_shape() {
        let request = RpcRequest {
            jsonrpc: "2.0",
            method: "host.get",
            params: json!({"monitored_hosts": true}),
            auth: "secret",
            id: 1,
        };

        let body = serde_json::to_value(&request).expect("should serialize");
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["method"], "host.get");
        assert_eq!(body["auth"], "secret");
        assert_eq!(body["id"], 1);
        assert_eq!(body["params"]["monitored_hosts"], true);
    }

    #[test]
    fn test_api_error_display() {
        let err = FetchError::Api {
            code: -32602,
            message: "Invalid params.".to_string(),
            data: "Not authorised.".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "zabbix api error [-32602] Invalid params. Not authorised."
        );
    }
}
