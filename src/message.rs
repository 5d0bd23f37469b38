use serde::{Deserialize, Serialize};
use std::error::Error;

/// A job for the printer. `lamport_timestamp` is stamped by the sending
/// peer right before emission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrintRequest {
    pub client_id: i32,
    pub message: String,
    pub lamport_timestamp: i64,
}

/// The printer's acknowledgment. The printer has no clock of its own and
/// echoes the timestamp it received.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrintResponse {
    pub success: bool,
    pub confirmation_message: String,
    pub lamport_timestamp: i64,
}

/// A peer asking every other peer for permission to enter the critical
/// section.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessRequest {
    pub client_id: i32,
    pub lamport_timestamp: i64,
    pub request_number: i32,
}

/// The affirmative answer to an [`AccessRequest`]. `access_granted` is
/// always true: a peer that cannot grant yet defers the response instead
/// of refusing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessResponse {
    pub access_granted: bool,
    pub lamport_timestamp: i64,
    pub responder_id: i32,
}

/// Advisory notification that a peer left the critical section. Correctness
/// does not depend on it; it propagates the clock and feeds the logs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccessRelease {
    pub client_id: i32,
    pub lamport_timestamp: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Empty;

/// Envelope for the two coordination calls a peer serves, so both travel
/// over the one connection each remote peer keeps open to it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Coordination {
    RequestAccess(AccessRequest),
    ReleaseAccess(AccessRelease),
}

impl PrintRequest {
    pub fn to_json_string(&self) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_string(token: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(serde_json::from_str::<Self>(token)?)
    }
}

impl PrintResponse {
    pub fn to_json_string(&self) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_string(token: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(serde_json::from_str::<Self>(token)?)
    }
}

impl AccessResponse {
    pub fn to_json_string(&self) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_string(token: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(serde_json::from_str::<Self>(token)?)
    }
}

impl Empty {
    pub fn to_json_string(&self) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_string(token: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(serde_json::from_str::<Self>(token)?)
    }
}

impl Coordination {
    pub fn to_json_string(&self) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_string(token: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(serde_json::from_str::<Self>(token)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordination_envelope_distinguishes_the_two_calls() {
        let request = Coordination::RequestAccess(AccessRequest {
            client_id: 1,
            lamport_timestamp: 4,
            request_number: 2,
        });
        let line = request.to_json_string().unwrap();

        match Coordination::from_json_string(&line).unwrap() {
            Coordination::RequestAccess(inner) => {
                assert_eq!(inner.client_id, 1);
                assert_eq!(inner.lamport_timestamp, 4);
                assert_eq!(inner.request_number, 2);
            }
            Coordination::ReleaseAccess(_) => panic!("Parsed the wrong variant."),
        }
    }

    #[test]
    fn wire_field_names_stay_stable() {
        let response = AccessResponse {
            access_granted: true,
            lamport_timestamp: 9,
            responder_id: 3,
        };
        let value: serde_json::Value =
            serde_json::from_str(&response.to_json_string().unwrap()).unwrap();

        assert_eq!(value["access_granted"], true);
        assert_eq!(value["lamport_timestamp"], 9);
        assert_eq!(value["responder_id"], 3);
    }

    #[test]
    fn print_messages_survive_the_line_codec_shape() {
        let request = PrintRequest {
            client_id: 2,
            message: "message 1 from client 2".to_string(),
            lamport_timestamp: 2,
        };
        let line = request.to_json_string().unwrap();

        // one frame per line, so the payload itself must stay on one line
        assert!(!line.contains('\n'));
        let parsed = PrintRequest::from_json_string(&line).unwrap();
        assert_eq!(parsed.message, request.message);
    }
}
