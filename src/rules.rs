//! Rule and alert wire types, and the table/granularity derivation a threshold
//! rule's `time_range` selects.

use crate::store::TableName;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub above: bool,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Threshold {
    pub metric: String,
    pub condition: Condition,
    pub occurrence: u32,
    #[serde(rename = "timeRange", with = "duration_nanos")]
    pub time_range: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub ingress: String,
    #[serde(default)]
    pub service: String,
    pub threshold: Option<Threshold>,
}

impl Rule {
    /// `"threshold"` when the rule carries a threshold clause, `"unknown"` otherwise —
    /// the alert manager's processor registry is keyed on this string.
    pub fn kind(&self) -> &'static str {
        if self.threshold.is_some() {
            "threshold"
        } else {
            "unknown"
        }
    }

    /// Derives the table and bucket granularity (seconds) a threshold rule's
    /// `time_range` selects. Every boundary is exclusive: a `time_range` of
    /// exactly 24h selects `"1h"`, not `"1d"`.
    pub fn table_and_granularity(&self) -> Option<(TableName, i64)> {
        let time_range = self.threshold.as_ref()?.time_range;
        let secs = time_range.as_secs() as i64;
        if secs > 24 * 3600 {
            Some((TableName::OneDay, 24 * 3600))
        } else if secs > 3600 {
            Some((TableName::OneHour, 3600))
        } else if secs > 600 {
            Some((TableName::TenMinutes, 600))
        } else {
            Some((TableName::OneMinute, 60))
        }
    }
}

/// One (timestamp, scalar) observation carried on the wire, distinct from the
/// store's full [`crate::model::DataPoint`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AlertPoint {
    pub ts: i64,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "ruleId")]
    pub rule_id: String,
    pub ingress: String,
    pub service: String,
    pub points: Vec<AlertPoint>,
    /// Base64-encoded on the wire via serde_with in the backend client; held here
    /// as raw gzip bytes.
    #[serde(with = "logs_base64")]
    pub logs: Vec<u8>,
    pub threshold: Threshold,
}

/// A descriptor identifying an alert for the preflight round-trip, without its
/// points or logs.
#[derive(Debug, Clone, Serialize)]
pub struct AlertDescriptor {
    pub id: String,
    #[serde(rename = "ruleId")]
    pub rule_id: String,
    pub ingress: String,
    pub service: String,
}

impl Alert {
    pub fn descriptor(&self) -> AlertDescriptor {
        AlertDescriptor {
            id: format!("{}:{}:{}", self.rule_id, self.ingress, self.service),
            rule_id: self.rule_id.clone(),
            ingress: self.ingress.clone(),
            service: self.service.clone(),
        }
    }
}

mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (duration.as_nanos() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}

mod logs_base64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        use base64::Engine;
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        use base64::Engine;
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn threshold_rule(time_range: Duration) -> Rule {
        Rule {
            id: "r1".to_string(),
            ingress: String::new(),
            service: "whoami@myns".to_string(),
            threshold: Some(Threshold {
                metric: "requestsPerSecond".to_string(),
                condition: Condition { above: true, value: 100.0 },
                occurrence: 2,
                time_range,
            }),
        }
    }

    #[test]
    fn kind_reflects_threshold_presence() {
        assert_eq!(threshold_rule(Duration::from_secs(60)).kind(), "threshold");
        let unknown = Rule {
            id: "r2".to_string(),
            ingress: String::new(),
            service: String::new(),
            threshold: None,
        };
        assert_eq!(unknown.kind(), "unknown");
    }

    #[test]
    fn exactly_24h_maps_to_one_hour_table() {
        let rule = threshold_rule(Duration::from_secs(24 * 3600));
        let (table, granularity) = rule.table_and_granularity().unwrap();
        assert_eq!(table.as_str(), "1h");
        assert_eq!(granularity, 3600);
    }

    #[test]
    fn over_24h_maps_to_one_day_table() {
        let rule = threshold_rule(Duration::from_secs(24 * 3600 + 1));
        let (table, _) = rule.table_and_granularity().unwrap();
        assert_eq!(table.as_str(), "1d");
    }

    #[test]
    fn short_range_maps_to_one_minute_table() {
        let rule = threshold_rule(Duration::from_secs(30));
        let (table, _) = rule.table_and_granularity().unwrap();
        assert_eq!(table.as_str(), "1m");
    }
}
