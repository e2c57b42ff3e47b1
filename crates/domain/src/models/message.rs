//! Queue message payloads.
//!
//! Four queues carry the pipeline: `pending_enroll` (front to worker),
//! `pending_registration` (worker internal), `enrolled` and `enroll_error`
//! (worker back to front). All payloads are JSON; the `type` field
//! multiplexes enroll, renew and unenroll traffic over the shared queues.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of work item flowing through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollKind {
    Enroll,
    RenewEnroll,
    Unenroll,
}

impl std::fmt::Display for EnrollKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrollKind::Enroll => write!(f, "enroll"),
            EnrollKind::RenewEnroll => write!(f, "renew_enroll"),
            EnrollKind::Unenroll => write!(f, "unenroll"),
        }
    }
}

/// Payload posted to `pending_enroll` by the front.
///
/// Decouples the front from the rest of the enroll flow: the front answers
/// 202 as soon as the record exists and this message is queued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollCommand {
    /// Enroll (or unenroll) record id.
    pub id: Uuid,
    pub tenant_id: String,
    /// Request id allocated with the record, propagated for tracing and for
    /// idempotency on the CA/DSTS side.
    pub request_id: Uuid,
    /// Base64 CSR as presented by the device. Empty for unenroll.
    #[serde(default)]
    pub csr: String,
    #[serde(rename = "type")]
    pub kind: EnrollKind,
    #[serde(default)]
    pub mgmt_service: String,
    #[serde(default)]
    pub hardware_hash: String,
    /// Present for renew and unenroll, where the device already exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<Uuid>,
}

/// Payload posted to `pending_registration` once the CA issued a
/// certificate, and to `enrolled` once DSTS registration completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCertificate {
    pub request_id: Uuid,
    pub tenant_id: String,
    pub enroll_id: Uuid,
    pub device_id: Uuid,
    /// Base64 encoded device certificate.
    pub certificate: String,
    /// Base64 encoded root and signing certificates.
    pub parent_certificates: String,
    #[serde(rename = "type")]
    pub kind: EnrollKind,
    #[serde(default)]
    pub mgmt_service: String,
    #[serde(default)]
    pub hardware_hash: String,
}

/// Completion payload for unenroll, posted to the shared `enrolled` queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnenrollCompleted {
    pub unenroll_id: Uuid,
    pub request_id: Uuid,
    pub tenant_id: String,
    pub device_id: Uuid,
    #[serde(rename = "type")]
    pub kind: EnrollKind,
}

/// Failure payload posted to `enroll_error` from any pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollErrorMessage {
    pub enroll_id: Uuid,
    pub error_code: i32,
    pub error_message: String,
    #[serde(rename = "type")]
    pub kind: EnrollKind,
    pub request_id: Uuid,
}

/// A message received from the `enrolled` queue. The queue is overloaded:
/// enroll and renew completions carry a certificate, unenroll completions
/// carry only the record identity. The `type` field decides the shape.
#[derive(Debug, Clone)]
pub enum EnrolledMessage {
    Certificate(DeviceCertificate),
    Unenrolled(UnenrollCompleted),
}

impl EnrolledMessage {
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        struct Probe {
            #[serde(rename = "type")]
            kind: EnrollKind,
        }

        let probe: Probe = serde_json::from_str(body)?;
        match probe.kind {
            EnrollKind::Unenroll => Ok(Self::Unenrolled(serde_json::from_str(body)?)),
            EnrollKind::Enroll | EnrollKind::RenewEnroll => {
                Ok(Self::Certificate(serde_json::from_str(body)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn certificate_message(kind: EnrollKind) -> DeviceCertificate {
        DeviceCertificate {
            request_id: Uuid::new_v4(),
            tenant_id: "tenant-a".into(),
            enroll_id: Uuid::new_v4(),
            device_id: Uuid::new_v4(),
            certificate: "Y2VydA==".into(),
            parent_certificates: "cGFyZW50".into(),
            kind,
            mgmt_service: "HPConnect".into(),
            hardware_hash: String::new(),
        }
    }

    #[test]
    fn test_enroll_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&EnrollKind::RenewEnroll).unwrap(),
            "\"renew_enroll\""
        );
        assert_eq!(EnrollKind::Unenroll.to_string(), "unenroll");
    }

    #[test]
    fn test_enroll_command_omits_missing_device_id() {
        let cmd = EnrollCommand {
            id: Uuid::new_v4(),
            tenant_id: "tenant-a".into(),
            request_id: Uuid::new_v4(),
            csr: "ZHVtbXk=".into(),
            kind: EnrollKind::Enroll,
            mgmt_service: "HPConnect".into(),
            hardware_hash: String::new(),
            device_id: None,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(!json.contains("device_id"));
        assert!(json.contains("\"type\":\"enroll\""));
    }

    #[test]
    fn test_enrolled_message_routes_by_type() {
        let cert = certificate_message(EnrollKind::Enroll);
        let body = serde_json::to_string(&cert).unwrap();
        assert!(matches!(
            EnrolledMessage::parse(&body).unwrap(),
            EnrolledMessage::Certificate(_)
        ));

        let done = UnenrollCompleted {
            unenroll_id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            tenant_id: "tenant-a".into(),
            device_id: Uuid::new_v4(),
            kind: EnrollKind::Unenroll,
        };
        let body = serde_json::to_string(&done).unwrap();
        assert!(matches!(
            EnrolledMessage::parse(&body).unwrap(),
            EnrolledMessage::Unenrolled(_)
        ));
    }

    #[test]
    fn test_enrolled_message_rejects_untyped_body() {
        assert!(EnrolledMessage::parse("{}").is_err());
        assert!(EnrolledMessage::parse("{\"type\":\"reboot\"}").is_err());
    }

    #[test]
    fn test_renew_certificate_keeps_type_through_round_trip() {
        let cert = certificate_message(EnrollKind::RenewEnroll);
        let body = serde_json::to_string(&cert).unwrap();
        match EnrolledMessage::parse(&body).unwrap() {
            EnrolledMessage::Certificate(parsed) => assert_eq!(parsed.kind, EnrollKind::RenewEnroll),
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
