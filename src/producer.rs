//! NATS message producer for prediction responses

use crate::types::prediction::PredictionResponse;
use anyhow::Result;
use async_nats::Client;
use tracing::debug;

/// Producer for publishing prediction responses to NATS
#[derive(Clone)]
pub struct ResponseProducer {
    client: Client,
    subject: String,
}

impl ResponseProducer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    /// Publish a completed or failed response
    pub async fn publish(&self, response: &PredictionResponse) -> Result<()> {
        let payload = serde_json::to_vec(response)?;

        self.client
            .publish(self.subject.clone(), payload.into())
            .await?;

        debug!(
            request_id = %response.request_id(),
            subject = %self.subject,
            "Published prediction response"
        );

        Ok(())
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{PipelineError, PredictionError};
    use crate::types::domain::Domain;
    use crate::types::prediction::{PredictionRecord, PredictionRequest, PredictionResponse, PredictionResult};

    // Publishing requires a running NATS server; the payload shape is tested here

    fn request() -> PredictionRequest {
        PredictionRequest {
            request_id: "r-7".to_string(),
            user_id: "u-1".to_string(),
            domain: Domain::Heart,
            features: vec![63.0; 13],
        }
    }

    #[test]
    fn test_completed_payload() {
        let record = PredictionRecord::new(&request(), PredictionResult::classify(0.75));
        let value = serde_json::to_value(PredictionResponse::Completed(record)).unwrap();

        assert_eq!(value["status"], "completed");
        assert_eq!(value["request_id"], "r-7");
        assert_eq!(value["category"], "High Risk");
        assert_eq!(value["risk_percentage"], 75.0);
    }

    #[test]
    fn test_failed_payload_hides_internal_errors() {
        let error = PredictionError::after_retry(
            Domain::Heart,
            PipelineError::Inference {
                domain: Domain::Heart,
                reason: "session crashed".to_string(),
            },
        );
        let value = serde_json::to_value(PredictionResponse::failed(&request(), &error)).unwrap();

        assert_eq!(value["status"], "failed");
        assert_eq!(value["error_kind"], "inference_error");
        assert_eq!(value["message"], PredictionResponse::RETRY_LATER);
    }
}
