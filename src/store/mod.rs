use std::collections::HashMap;
use std::sync::Arc;

use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::{
    AttributeValue, PutRequest, ReturnConsumedCapacity, WriteRequest,
};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::StoreConfig;

/// DynamoDB caps BatchWriteItem at 25 put requests per call.
pub const MAX_BATCH_PUT: usize = 25;

/// Persistence failure for one table's record stream.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record for table {table} is not a JSON object")]
    NotAnObject { table: String },

    #[error("batch write to {table} failed: {message}")]
    Write { table: String, message: String },

    #[error("write task for {table} failed: {message}")]
    Task { table: String, message: String },
}

/// Outcome of persisting one record stream.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PersistOutcome {
    /// Batch requests issued.
    pub writes: u32,
    /// Capacity units the store reported consuming.
    pub capacity_units: f64,
}

/// Destination for bounded batches of records.
pub trait BatchWriter: Send + Sync {
    /// Write one batch (at most [`MAX_BATCH_PUT`] records) to a table,
    /// returning the capacity units consumed.
    fn write_batch(
        &self,
        table: &str,
        records: Vec<serde_json::Value>,
    ) -> impl std::future::Future<Output = Result<f64, StoreError>> + Send;
}

/// Persist a record stream to one table, split into batches of at most
/// [`MAX_BATCH_PUT`] records written concurrently.
///
/// The first batch failure fails the whole call; batches still in flight
/// are aborted, so a partial write is possible.
pub async fn persist<W>(
    writer: Arc<W>,
    table: &str,
    records: Vec<serde_json::Value>,
) -> Result<PersistOutcome, StoreError>
where
    W: BatchWriter + 'static,
{
    if records.is_empty() {
        return Ok(PersistOutcome::default());
    }

    let mut tasks: JoinSet<Result<f64, StoreError>> = JoinSet::new();
    let mut iter = records.into_iter();

    loop {
        let chunk: Vec<_> = iter.by_ref().take(MAX_BATCH_PUT).collect();
        if chunk.is_empty() {
            break;
        }

        let writer = Arc::clone(&writer);
        let table = table.to_string();
        tasks.spawn(async move { writer.write_batch(&table, chunk).await });
    }

    let mut outcome = PersistOutcome::default();

    while let Some(joined) = tasks.join_next().await {
        let capacity = joined.map_err(|e| StoreError::Task {
            table: table.to_string(),
            message: e.to_string(),
        })??;

        outcome.writes += 1;
        outcome.capacity_units += capacity;
    }

    debug!(
        table,
        writes = outcome.writes,
        capacity_units = outcome.capacity_units,
        "persisted record stream"
    );

    Ok(outcome)
}

/// DynamoDB-backed batch writer.
pub struct DynamoWriter {
    client: aws_sdk_dynamodb::Client,
}

impl DynamoWriter {
    /// Create a writer from ambient AWS credentials plus the optional
    /// region and endpoint overrides.
    pub async fn new(cfg: &StoreConfig) -> Self {
        let mut loader =
            aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = &cfg.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }

        if let Some(endpoint) = &cfg.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;

        Self {
            client: aws_sdk_dynamodb::Client::new(&sdk_config),
        }
    }
}

impl BatchWriter for DynamoWriter {
    async fn write_batch(
        &self,
        table: &str,
        records: Vec<serde_json::Value>,
    ) -> Result<f64, StoreError> {
        let mut requests = Vec::with_capacity(records.len());

        for record in &records {
            let object = record.as_object().ok_or_else(|| StoreError::NotAnObject {
                table: table.to_string(),
            })?;

            let put = PutRequest::builder()
                .set_item(Some(marshall_object(object)))
                .build()
                .map_err(|e| StoreError::Write {
                    table: table.to_string(),
                    message: e.to_string(),
                })?;

            requests.push(WriteRequest::builder().put_request(put).build());
        }

        let output = self
            .client
            .batch_write_item()
            .request_items(table, requests)
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .send()
            .await
            .map_err(|e| StoreError::Write {
                table: table.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        if let Some(unprocessed) = output.unprocessed_items() {
            let count: usize = unprocessed.values().map(Vec::len).sum();
            if count > 0 {
                warn!(table, count, "batch write left unprocessed records");
            }
        }

        let capacity = output
            .consumed_capacity()
            .iter()
            .filter_map(|c| c.capacity_units())
            .sum();

        Ok(capacity)
    }
}

/// Marshall a JSON object into a DynamoDB item.
fn marshall_object(
    object: &serde_json::Map<String, serde_json::Value>,
) -> HashMap<String, AttributeValue> {
    object
        .iter()
        .map(|(key, value)| (key.clone(), to_attribute_value(value)))
        .collect()
}

/// Map one JSON value onto the corresponding DynamoDB attribute type.
fn to_attribute_value(value: &serde_json::Value) -> AttributeValue {
    match value {
        serde_json::Value::Null => AttributeValue::Null(true),
        serde_json::Value::Bool(b) => AttributeValue::Bool(*b),
        serde_json::Value::Number(n) => AttributeValue::N(n.to_string()),
        serde_json::Value::String(s) => AttributeValue::S(s.clone()),
        serde_json::Value::Array(items) => {
            AttributeValue::L(items.iter().map(to_attribute_value).collect())
        }
        serde_json::Value::Object(map) => AttributeValue::M(marshall_object(map)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    /// Records every batch it receives; optionally fails a given table.
    #[derive(Default)]
    struct RecordingWriter {
        batches: Mutex<Vec<(String, usize)>>,
        capacity_per_batch: f64,
        fail_table: Option<String>,
    }

    impl BatchWriter for RecordingWriter {
        async fn write_batch(
            &self,
            table: &str,
            records: Vec<serde_json::Value>,
        ) -> Result<f64, StoreError> {
            if self.fail_table.as_deref() == Some(table) {
                return Err(StoreError::Write {
                    table: table.to_string(),
                    message: "injected failure".to_string(),
                });
            }

            self.batches
                .lock()
                .expect("lock should not be poisoned")
                .push((table.to_string(), records.len()));

            Ok(self.capacity_per_batch)
        }
    }

    fn records(n: usize) -> Vec<serde_json::Value> {
        (0..n).map(|i| json!({"hostid": i.to_string()})).collect()
    }

    #[tokio::test]
    async fn test_persist_empty_stream_writes_nothing() {
        let writer = Arc::new(RecordingWriter::default());
        let outcome = persist(Arc::clone(&writer), "zabbix.hosts", Vec::new())
            .await
            .expect("persist should succeed");

        assert_eq!(outcome, PersistOutcome::default());
        assert!(writer.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persist_single_partial_batch() {
        let writer = Arc::new(RecordingWriter {
            capacity_per_batch: 1.5,
            ..Default::default()
        });

        let outcome = persist(Arc::clone(&writer), "zabbix.hosts", records(7))
            .await
            .expect("persist should succeed");

        assert_eq!(outcome.writes, 1);
        assert_eq!(outcome.capacity_units, 1.5);

        let batches = writer.batches.lock().unwrap();
        assert_eq!(batches.as_slice(), &[("zabbix.hosts".to_string(), 7)]);
    }

    #[tokio::test]
    async fn test_persist_splits_into_bounded_batches() {
        let writer = Arc::new(RecordingWriter {
            capacity_per_batch: 2.0,
            ..Default::default()
        });

        let outcome = persist(Arc::clone(&writer), "zabbix.events", records(61))
            .await
            .expect("persist should succeed");

        assert_eq!(outcome.writes, 3);
        assert_eq!(outcome.capacity_units, 6.0);

        let mut sizes: Vec<usize> = writer
            .batches
            .lock()
            .unwrap()
            .iter()
            .map(|(_, n)| *n)
            .collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![11, 25, 25]);
    }

    #[tokio::test]
    async fn test_persist_batch_failure_propagates() {
        let writer = Arc::new(RecordingWriter {
            fail_table: Some("zabbix.events".to_string()),
            ..Default::default()
        });

        let err = persist(Arc::clone(&writer), "zabbix.events", records(30))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Write { .. }));
        assert!(err.to_string().contains("zabbix.events"));
    }

    #[test]
    fn test_marshall_scalars() {
        let object = json!({
            "hostid": "10084",
            "status": 503,
            "maintenance": false,
            "comment": null,
        });

        let item = marshall_object(object.as_object().unwrap());
        assert_eq!(item["hostid"], AttributeValue::S("10084".to_string()));
        assert_eq!(item["status"], AttributeValue::N("503".to_string()));
        assert_eq!(item["maintenance"], AttributeValue::Bool(false));
        assert_eq!(item["comment"], AttributeValue::Null(true));
    }

    #[test]
    fn test_marshall_nested_structures() {
        let object = json!({
            "tags": ["a", "b"],
            "meta": {"severity": 4},
        });

        let item = marshall_object(object.as_object().unwrap());
        assert_eq!(
            item["tags"],
            AttributeValue::L(vec![
                AttributeValue::S("a".to_string()),
                AttributeValue::S("b".to_string()),
            ])
        );

        let AttributeValue::M(meta) = &item["meta"] else {
            panic!("meta should be a map attribute");
        };
        assert_eq!(meta["severity"], AttributeValue::N("4".to_string()));
    }

    #[test]
    fn test_marshall_fractional_number() {
        let object = json!({"load": 0.25});
        let item = marshall_object(object.as_object().unwrap());
        assert_eq!(item["load"], AttributeValue::N("0.25".to_string()));
    }
}
