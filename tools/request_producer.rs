//! Test Request Producer
//!
//! Generates random patient measurements for every domain and publishes
//! them as prediction requests to NATS.
//!
//! Usage: request_producer [nats_url] [subject] [count] [invalid_rate] [delay_ms]

use health_risk_pipeline::types::{domain::Domain, prediction::PredictionRequest};
use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};

/// Request generator for testing
struct RequestGenerator {
    rng: rand::rngs::ThreadRng,
    request_counter: u64,
}

impl RequestGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            request_counter: 0,
        }
    }

    fn flag(&mut self, p: f64) -> f64 {
        if self.rng.gen_bool(p) {
            1.0
        } else {
            0.0
        }
    }

    fn heart(&mut self) -> Vec<f64> {
        let age = self.rng.gen_range(29.0..78.0_f64).round();
        let sex = self.flag(0.68);
        let cp = self.rng.gen_range(0..4) as f64;
        let trestbps = self.rng.gen_range(94.0..200.0_f64).round();
        let chol = self.rng.gen_range(126.0..400.0_f64).round();
        let fbs = self.flag(0.15);
        let restecg = self.rng.gen_range(0..3) as f64;
        let thalach = self.rng.gen_range(71.0..202.0_f64).round();
        let exang = self.flag(0.33);
        let oldpeak = (self.rng.gen_range(0.0..6.2_f64) * 10.0).round() / 10.0;
        let slope = self.rng.gen_range(0..3) as f64;
        let ca = self.rng.gen_range(0..4) as f64;
        let thal = self.rng.gen_range(1..4) as f64;
        vec![age, sex, cp, trestbps, chol, fbs, restecg, thalach, exang, oldpeak, slope, ca, thal]
    }

    fn lung(&mut self) -> Vec<f64> {
        let age = self.rng.gen_range(20.0..80.0_f64).round();
        let smoking = self.flag(0.3);
        let air_quality = self.rng.gen_range(20.0..300.0_f64).round();
        let alcohol = self.flag(0.4);
        let bmi = (self.rng.gen_range(18.0..40.0_f64) * 10.0).round() / 10.0;
        let family_history = self.flag(0.2);
        let activity = self.rng.gen_range(0..4) as f64;
        let occupation = self.flag(0.25);
        vec![age, smoking, air_quality, alcohol, bmi, family_history, activity, occupation]
    }

    fn liver(&mut self) -> Vec<f64> {
        let age = self.rng.gen_range(4.0..90.0_f64).round();
        let gender = self.flag(0.75);
        let total_bili = (self.rng.gen_range(0.4..10.0_f64) * 10.0).round() / 10.0;
        let direct_bili = (total_bili * self.rng.gen_range(0.1..0.6)).max(0.1);
        let alk_phos = self.rng.gen_range(63.0..800.0_f64).round();
        let alt = self.rng.gen_range(10.0..400.0_f64).round();
        let ast = self.rng.gen_range(10.0..500.0_f64).round();
        let total_proteins = (self.rng.gen_range(2.7..9.6_f64) * 10.0).round() / 10.0;
        let albumin = (total_proteins * self.rng.gen_range(0.35..0.6)).max(0.9);
        let ag_ratio = albumin / (total_proteins - albumin).max(0.1);
        vec![
            age,
            gender,
            total_bili,
            direct_bili,
            alk_phos,
            alt,
            ast,
            total_proteins,
            albumin,
            ag_ratio,
        ]
    }

    fn diabetes(&mut self) -> Vec<f64> {
        let pregnancies = self.rng.gen_range(0..12) as f64;
        let glucose = self.rng.gen_range(60.0..200.0_f64).round();
        let blood_pressure = self.rng.gen_range(40.0..110.0_f64).round();
        let skin_thickness = self.rng.gen_range(0.0..60.0_f64).round();
        let insulin = self.rng.gen_range(0.0..400.0_f64).round();
        let bmi = (self.rng.gen_range(18.0..50.0_f64) * 10.0).round() / 10.0;
        let pedigree = (self.rng.gen_range(0.08..2.4_f64) * 1000.0).round() / 1000.0;
        let age = self.rng.gen_range(21.0..81.0_f64).round();
        vec![
            pregnancies,
            glucose,
            blood_pressure,
            skin_thickness,
            insulin,
            bmi,
            pedigree,
            age,
        ]
    }

    /// Generate a request for a random domain; malformed requests drop a field
    fn generate(&mut self, malformed: bool) -> PredictionRequest {
        self.request_counter += 1;
        let domain = Domain::ALL[self.rng.gen_range(0..Domain::ALL.len())];

        let mut features = match domain {
            Domain::Heart => self.heart(),
            Domain::Lung => self.lung(),
            Domain::Liver => self.liver(),
            Domain::Diabetes => self.diabetes(),
        };
        if malformed {
            features.pop();
        }

        PredictionRequest {
            request_id: format!("req_{:012}", self.request_counter),
            user_id: format!("user_{}", self.rng.gen_range(1..500)),
            domain,
            features,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("request_producer=info".parse()?),
        )
        .init();

    info!("Starting Test Request Producer");

    let args: Vec<String> = std::env::args().collect();
    let nats_url = args.get(1).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(2).map(|s| s.as_str()).unwrap_or("predictions.requests");
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let invalid_rate: f64 = args
        .get(4)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.05_f64)
        .clamp(0.0, 1.0);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        nats_url = %nats_url,
        subject = %subject,
        count = count,
        invalid_rate = invalid_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            Some(c)
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            None
        }
    };

    let mut generator = RequestGenerator::new();
    let mut rng = rand::thread_rng();
    let mut malformed_count = 0;

    for i in 0..count {
        let malformed = rng.gen_bool(invalid_rate);
        if malformed {
            malformed_count += 1;
        }
        let request = generator.generate(malformed);

        match &client {
            Some(client) => {
                let payload = serde_json::to_vec(&request)?;
                client.publish(subject.to_string(), payload.into()).await?;

                if (i + 1) % 10 == 0 {
                    info!(
                        "Published {}/{} requests ({} malformed)",
                        i + 1,
                        count,
                        malformed_count
                    );
                }
            }
            None => {
                if (i + 1) % 10 == 0 || i == 0 {
                    info!("Sample request {}:\n{}", i + 1, serde_json::to_string_pretty(&request)?);
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    info!(
        "Completed! Generated {} requests ({} malformed)",
        count, malformed_count
    );

    Ok(())
}
