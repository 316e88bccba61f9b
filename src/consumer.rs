//! NATS message consumer for incoming prediction requests

use crate::types::prediction::PredictionRequest;
use anyhow::Result;
use async_nats::{Client, Subscriber};
use tracing::info;

/// Consumer for receiving prediction requests from NATS
pub struct RequestConsumer {
    client: Client,
    subject: String,
}

impl RequestConsumer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Subscribe to the request subject
    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = self.client.subscribe(self.subject.clone()).await?;
        info!(subject = %self.subject, "Subscribed to request subject");
        Ok(subscriber)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Decode a request payload
pub fn decode_request(payload: &[u8]) -> serde_json::Result<PredictionRequest> {
    serde_json::from_slice(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::domain::Domain;

    // Subscribing requires a running NATS server; only decoding is tested here

    #[test]
    fn test_decode_request() {
        let payload = br#"{"request_id":"r-1","user_id":"u-9","domain":"liver","features":[45,1,0.8,0.2,190,25,30,6.8,3.4,1.0]}"#;
        let request = decode_request(payload).unwrap();
        assert_eq!(request.domain, Domain::Liver);
        assert_eq!(request.features.len(), 10);
        assert_eq!(request.features[0], 45.0);
    }

    #[test]
    fn test_unknown_domain_is_rejected() {
        let payload = br#"{"request_id":"r-1","user_id":"u-9","domain":"kidney","features":[]}"#;
        assert!(decode_request(payload).is_err());
    }
}
