//! Client → Server messages

use serde::{Deserialize, Serialize};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Begin a new autofill run against the given job application URL.
    StartAgent { job_url: String },
    /// Stop the issuer's run, if one is active.
    StopAgent,
}

#[cfg(test)]
mod tests {
    use super::ClientMessage;

    #[test]
    fn deserializes_start_agent() {
        let json = r#"{"type":"start_agent","job_url":"https://apply.appcast.io/jobs/123/apply"}"#;

        let parsed: ClientMessage = serde_json::from_str(json).expect("parse start_agent");
        match parsed {
            ClientMessage::StartAgent { job_url } => {
                assert_eq!(job_url, "https://apply.appcast.io/jobs/123/apply");
            }
            other => panic!("unexpected message variant: {:?}", other),
        }
    }

    #[test]
    fn deserializes_stop_agent() {
        let json = r#"{"type":"stop_agent"}"#;

        let parsed: ClientMessage = serde_json::from_str(json).expect("parse stop_agent");
        match parsed {
            ClientMessage::StopAgent => {}
            other => panic!("unexpected message variant: {:?}", other),
        }
    }

    #[test]
    fn roundtrip_start_agent() {
        let msg = ClientMessage::StartAgent {
            job_url: "https://jobs.lever.co/acme/42".to_string(),
        };

        let serialized = serde_json::to_string(&msg).expect("serialize");
        assert!(serialized.contains(r#""type":"start_agent""#));

        let reparsed: ClientMessage = serde_json::from_str(&serialized).expect("reparse");
        match reparsed {
            ClientMessage::StartAgent { job_url } => {
                assert_eq!(job_url, "https://jobs.lever.co/acme/42");
            }
            other => panic!("unexpected variant on roundtrip: {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_command() {
        let json = r#"{"type":"launch_missiles"}"#;
        assert!(serde_json::from_str::<ClientMessage>(json).is_err());
    }
}
