//! Shared request/response and host models.
//!
//! `CollectRequest` is the wire format between intake, bus and collector;
//! the JSON keys (`hostid`, `scriptid`, `exuid`) are part of the external
//! contract and must not change.

use crate::error::CollectError;
use crate::CollectResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A request to collect data from one host with one script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectRequest {
    pub hostid: i64,
    pub scriptid: i64,
    /// Stable correlation key across producer, consumer, worker and store.
    /// Assigned at intake when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exuid: Option<Uuid>,
}

impl CollectRequest {
    pub fn new(hostid: i64, scriptid: i64) -> Self {
        Self {
            hostid,
            scriptid,
            exuid: None,
        }
    }

    /// Both ids must be non-negative.
    pub fn validate(&self) -> CollectResult<()> {
        if self.hostid < 0 {
            return Err(CollectError::Validation(format!(
                "hostid must be >= 0, got {}",
                self.hostid
            )));
        }
        if self.scriptid < 0 {
            return Err(CollectError::Validation(format!(
                "scriptid must be >= 0, got {}",
                self.scriptid
            )));
        }
        Ok(())
    }

    /// Return the execution id, assigning a fresh one when unset.
    pub fn ensure_execution_id(&mut self) -> Uuid {
        *self.exuid.get_or_insert_with(Uuid::new_v4)
    }
}

/// Host metadata attached to a job at load time.
///
/// Populated by a catalog lookup (stubbed from the template today);
/// immutable for the lifetime of the job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    pub customer_id: i64,
    pub host_id: i64,
    pub script_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_key: Option<String>,
}

/// SSH endpoint and credentials for one job.
///
/// Credentials never serialize; only the endpoint identity travels with
/// the persisted graph.
#[derive(Debug, Clone, Serialize)]
pub struct TransportConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub remote_host: String,
    #[serde(skip_serializing)]
    pub login: String,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(skip_serializing)]
    pub ssh_key_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_json_contract() {
        let json = r#"{"hostid":1,"scriptid":2}"#;
        let req: CollectRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.hostid, 1);
        assert_eq!(req.scriptid, 2);
        assert!(req.exuid.is_none());
    }

    #[test]
    fn test_request_round_trip_with_exuid() {
        let mut req = CollectRequest::new(3, 4);
        let id = req.ensure_execution_id();

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"exuid\""));

        let back: CollectRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.exuid, Some(id));
    }

    #[test]
    fn test_ensure_execution_id_is_stable() {
        let mut req = CollectRequest::new(1, 1);
        let first = req.ensure_execution_id();
        let second = req.ensure_execution_id();
        assert_eq!(first, second);
    }

    #[test]
    fn test_validation_rejects_negative_ids() {
        assert!(CollectRequest::new(-1, 0).validate().is_err());
        assert!(CollectRequest::new(0, -5).validate().is_err());
        assert!(CollectRequest::new(0, 0).validate().is_ok());
    }

    #[test]
    fn test_host_config_camel_case_wire_format() {
        let host = HostConfig {
            customer_id: 1,
            host_id: 2,
            script_id: 3,
            host_name: Some("db-01".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&host).unwrap();
        assert_eq!(value["customerId"], 1);
        assert_eq!(value["hostId"], 2);
        assert_eq!(value["hostName"], "db-01");
        // Unset optionals are omitted entirely
        assert!(value.get("hostIp").is_none());
    }

    #[test]
    fn test_transport_config_hides_credentials() {
        let config = TransportConfig {
            version: Some("1.0".to_string()),
            remote_host: "10.0.0.5:22".to_string(),
            login: "svc".to_string(),
            password: "secret".to_string(),
            ssh_key_path: "/keys/id_ed25519".to_string(),
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("remote_host"));
        assert!(!json.contains("secret"));
        assert!(!json.contains("login"));
        assert!(!json.contains("ssh_key_path"));
    }
}
