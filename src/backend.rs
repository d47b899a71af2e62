//! HTTP client for the remote control plane: the five endpoints listed in the
//! external interfaces contract. JSON endpoints use `reqwest`'s JSON helpers;
//! the two high-volume endpoints (`/data`, `/metrics`) exchange Avro binary.

use crate::error::AgentError;
use crate::model::DataPointGroup;
use crate::rules::{Alert, AlertDescriptor, Rule};
use crate::store::TableName;
use apache_avro::types::Value as AvroValue;
use apache_avro::{Reader as AvroReader, Schema, Writer as AvroWriter};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::HashMap;

const DATA_SCHEMA: &str = r#"
{
  "type": "record",
  "name": "DataPointGroup",
  "fields": [
    {"name": "table", "type": "string"},
    {"name": "ingress", "type": "string"},
    {"name": "service", "type": "string"},
    {"name": "timestamps", "type": {"type": "array", "items": "long"}},
    {"name": "requests", "type": {"type": "array", "items": "long"}}
  ]
}
"#;

#[async_trait]
pub trait Backend: Send + Sync {
    async fn get_rules(&self) -> Result<Vec<Rule>, AgentError>;
    async fn get_previous_data(&self) -> Result<HashMap<TableName, Vec<DataPointGroup>>, AgentError>;
    async fn send(&self, points: HashMap<TableName, Vec<DataPointGroup>>) -> Result<(), AgentError>;
    async fn preflight_alerts(&self, descriptors: &[AlertDescriptor]) -> Result<Vec<usize>, AgentError>;
    async fn send_alerts(&self, alerts: &[Alert]) -> Result<(), AgentError>;
}

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpBackend {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        HttpBackend {
            client,
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AgentError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AgentError::BackendStatus {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn get_rules(&self) -> Result<Vec<Rule>, AgentError> {
        let response = self
            .client
            .get(self.url("/rules"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.json::<Vec<Rule>>().await?)
    }

    async fn get_previous_data(&self) -> Result<HashMap<TableName, Vec<DataPointGroup>>, AgentError> {
        let response = self
            .client
            .get(self.url("/data"))
            .header("Accept", "avro/binary;v2")
            .bearer_auth(&self.token)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let bytes = response.bytes().await?;
        decode_data(&bytes)
    }

    async fn send(&self, points: HashMap<TableName, Vec<DataPointGroup>>) -> Result<(), AgentError> {
        let bytes = encode_data(&points)?;
        let response = self
            .client
            .post(self.url("/metrics"))
            .header("Content-Type", "avro/binary;v2")
            .bearer_auth(&self.token)
            .body(bytes)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn preflight_alerts(&self, descriptors: &[AlertDescriptor]) -> Result<Vec<usize>, AgentError> {
        let response = self
            .client
            .post(self.url("/preflight"))
            .bearer_auth(&self.token)
            .json(descriptors)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let indices: Vec<i64> = response.json().await?;

        let mut result = Vec::with_capacity(indices.len());
        for idx in indices {
            if idx < 0 || idx as usize >= descriptors.len() {
                return Err(AgentError::InvalidAlertPosition(idx.max(0) as usize));
            }
            result.push(idx as usize);
        }
        Ok(result)
    }

    async fn send_alerts(&self, alerts: &[Alert]) -> Result<(), AgentError> {
        let response = self
            .client
            .post(self.url("/notify"))
            .bearer_auth(&self.token)
            .json(alerts)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }
}

fn encode_data(points: &HashMap<TableName, Vec<DataPointGroup>>) -> Result<Vec<u8>, AgentError> {
    let schema = Schema::parse_str(DATA_SCHEMA).map_err(|e| AgentError::BackendDecode(e.to_string()))?;
    let mut writer = AvroWriter::new(&schema, Vec::new());

    for (table, groups) in points {
        for group in groups {
            let timestamps: Vec<AvroValue> = group.points.iter().map(|p| AvroValue::Long(p.timestamp)).collect();
            let requests: Vec<AvroValue> = group
                .points
                .iter()
                .map(|p| AvroValue::Long(p.requests as i64))
                .collect();
            let record = AvroValue::Record(vec![
                ("table".to_string(), AvroValue::String(table.as_str().to_string())),
                ("ingress".to_string(), AvroValue::String(group.ingress.clone())),
                ("service".to_string(), AvroValue::String(group.service.clone())),
                ("timestamps".to_string(), AvroValue::Array(timestamps)),
                ("requests".to_string(), AvroValue::Array(requests)),
            ]);
            writer
                .append(record)
                .map_err(|e| AgentError::BackendDecode(e.to_string()))?;
        }
    }

    writer.into_inner().map_err(|e| AgentError::BackendDecode(e.to_string()))
}

fn decode_data(bytes: &[u8]) -> Result<HashMap<TableName, Vec<DataPointGroup>>, AgentError> {
    let reader = AvroReader::new(bytes).map_err(|e| AgentError::BackendDecode(e.to_string()))?;
    let mut result: HashMap<TableName, Vec<DataPointGroup>> = HashMap::new();

    for record in reader {
        let record = record.map_err(|e| AgentError::BackendDecode(e.to_string()))?;
        let AvroValue::Record(fields) = record else {
            return Err(AgentError::BackendDecode("expected avro record".to_string()));
        };
        let mut table = None;
        let mut ingress = String::new();
        let mut service = String::new();
        let mut timestamps: Vec<i64> = Vec::new();
        let mut requests: Vec<i64> = Vec::new();

        for (name, value) in fields {
            match (name.as_str(), value) {
                ("table", AvroValue::String(s)) => table = TableName::parse(&s),
                ("ingress", AvroValue::String(s)) => ingress = s,
                ("service", AvroValue::String(s)) => service = s,
                ("timestamps", AvroValue::Array(values)) => {
                    timestamps = values
                        .into_iter()
                        .filter_map(|v| match v {
                            AvroValue::Long(n) => Some(n),
                            _ => None,
                        })
                        .collect();
                }
                ("requests", AvroValue::Array(values)) => {
                    requests = values
                        .into_iter()
                        .filter_map(|v| match v {
                            AvroValue::Long(n) => Some(n),
                            _ => None,
                        })
                        .collect();
                }
                _ => {}
            }
        }

        let Some(table) = table else {
            continue;
        };
        let points = timestamps
            .into_iter()
            .zip(requests)
            .map(|(ts, req)| crate::model::DataPoint {
                requests: req as u64,
                ..crate::model::DataPoint::zero(ts, 0)
            })
            .collect();
        result.entry(table).or_default().push(DataPointGroup {
            ingress,
            service,
            points,
        });
    }

    Ok(result)
}
