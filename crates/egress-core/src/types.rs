//! Shared data model: destination bindings and destination types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Destination types this pipeline knows how to deliver to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestinationType {
    /// Raw object storage (AWS S3).
    S3,
    /// Raw object storage (GCS).
    Gcs,
    /// Redshift warehouse.
    Rs,
    /// BigQuery warehouse.
    Bq,
}

impl DestinationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationType::S3 => "S3",
            DestinationType::Gcs => "GCS",
            DestinationType::Rs => "RS",
            DestinationType::Bq => "BQ",
        }
    }

    /// `true` for destinations the batch router delivers a compressed
    /// newline-delimited batch to directly (no warehouse staging/export).
    pub fn is_raw(&self) -> bool {
        matches!(self, DestinationType::S3 | DestinationType::Gcs)
    }

    /// `true` for destinations driven through the warehouse uploader
    /// (staging, schema migration, export).
    pub fn is_warehouse(&self) -> bool {
        matches!(self, DestinationType::Rs | DestinationType::Bq)
    }

    /// The object-storage provider a warehouse destination stages its raw
    /// files through, per `ObjectStorageMap`.
    pub fn staging_provider(&self) -> Option<DestinationType> {
        match self {
            DestinationType::Rs => Some(DestinationType::S3),
            DestinationType::Bq => Some(DestinationType::Gcs),
            _ => None,
        }
    }
}

impl std::str::FromStr for DestinationType {
    type Err = crate::error::EgressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S3" => Ok(DestinationType::S3),
            "GCS" => Ok(DestinationType::Gcs),
            "RS" => Ok(DestinationType::Rs),
            "BQ" => Ok(DestinationType::Bq),
            other => Err(crate::error::EgressError::invariant(format!(
                "unsupported destination type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for DestinationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An enabled `(source, destination)` pair, as delivered by the config
/// subscriber (C3). The enabled-binding list is replaced wholesale on each
/// config event; this struct is the per-binding unit of that list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationBinding {
    pub source_id: String,
    pub destination_id: String,
    pub destination_type: DestinationType,
    pub config: Value,
}

impl DestinationBinding {
    pub fn in_progress_key(&self) -> String {
        crate::registry::in_progress_key(&self.source_id, &self.destination_id)
    }

    /// Bucket for a raw destination, read out of the binding's own config.
    pub fn raw_bucket(&self) -> Option<&str> {
        self.config.get("bucket").and_then(|v| v.as_str())
    }

    /// Namespace (warehouse schema/dataset) for a warehouse destination,
    /// derived from the configured namespace or the source id.
    pub fn namespace(&self) -> String {
        self.config
            .get("namespace")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| snake_case(&self.source_id))
    }
}

fn snake_case(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_destination_type_round_trip() {
        for dt in [DestinationType::S3, DestinationType::Gcs, DestinationType::Rs, DestinationType::Bq] {
            assert_eq!(DestinationType::from_str(dt.as_str()).unwrap(), dt);
        }
    }

    #[test]
    fn test_staging_provider_mapping() {
        assert_eq!(DestinationType::Rs.staging_provider(), Some(DestinationType::S3));
        assert_eq!(DestinationType::Bq.staging_provider(), Some(DestinationType::Gcs));
        assert_eq!(DestinationType::S3.staging_provider(), None);
    }

    #[test]
    fn test_namespace_falls_back_to_snake_case_source() {
        let binding = DestinationBinding {
            source_id: "My Source!".to_string(),
            destination_id: "dest1".to_string(),
            destination_type: DestinationType::Rs,
            config: serde_json::json!({}),
        };
        assert_eq!(binding.namespace(), "my_source_");
    }
}
