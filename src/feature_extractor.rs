//! Feature engineering for the disease-risk models.
//!
//! Each domain appends a fixed set of interaction features to the raw
//! measurements. The same functions build the synthetic training matrix and
//! the inference vector, so the order and operand layout of every formula is
//! part of the artifact contract: a trained scaler/model pair only accepts
//! vectors produced exactly this way.

use crate::error::PipelineError;
use crate::types::domain::Domain;

/// Epsilon added to denominators that may legitimately be zero
pub const RATIO_EPSILON: f64 = 0.001;

const HEART_FEATURES: [&str; 18] = [
    "age",
    "sex",
    "cp",
    "trestbps",
    "chol",
    "fbs",
    "restecg",
    "thalach",
    "exang",
    "oldpeak",
    "slope",
    "ca",
    "thal",
    // Engineered
    "age_sex",
    "chol_age",
    "trestbps_chol",
    "exang_oldpeak",
    "risk_factors",
];

const LUNG_FEATURES: [&str; 12] = [
    "Age",
    "Smoking Status",
    "Area Air Quality Index",
    "Alcohol Consumption",
    "BMI",
    "Family History",
    "Physical Activity Level",
    "Occupation Exposure",
    // Engineered
    "Age_Smoking",
    "Smoking_AirQuality",
    "BMI_Activity",
    "Risk_Factor_Sum",
];

const LIVER_FEATURES: [&str; 15] = [
    "Age",
    "Gender",
    "Total_Bilirubin",
    "Direct_Bilirubin",
    "Alkaline_Phosphotase",
    "Alamine_Aminotransferase",
    "Aspartate_Aminotransferase",
    "Total_Protiens",
    "Albumin",
    "Albumin_and_Globulin_Ratio",
    // Engineered
    "Age_Gender",
    "Bilirubin_Ratio",
    "Enzyme_Ratio",
    "Protein_Ratio",
    "Liver_Score",
];

const DIABETES_FEATURES: [&str; 13] = [
    "Pregnancies",
    "Glucose",
    "BloodPressure",
    "SkinThickness",
    "Insulin",
    "BMI",
    "DiabetesPedigreeFunction",
    "Age",
    // Engineered
    "Glucose_BMI",
    "Age_BMI",
    "Glucose_Insulin",
    "Preg_Age",
    "Risk_Score",
];

/// Feature extractor for one domain.
///
/// Stateless; cheap to construct per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureExtractor {
    domain: Domain,
}

impl FeatureExtractor {
    pub fn new(domain: Domain) -> Self {
        Self { domain }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Extend a raw vector with the domain's derived features.
    ///
    /// Fails with `InvalidFeatureShape` when the input length is wrong and
    /// `InvalidFeatureValue` when a measurement, or a feature derived from
    /// out-of-range measurements, is not finite. Never pads or truncates.
    pub fn extract(&self, raw: &[f64]) -> Result<Vec<f64>, PipelineError> {
        let expected = self.domain.raw_feature_count();
        if raw.len() != expected {
            return Err(PipelineError::InvalidFeatureShape {
                domain: self.domain,
                expected,
                actual: raw.len(),
            });
        }
        if let Some(index) = raw.iter().position(|v| !v.is_finite()) {
            return Err(PipelineError::InvalidFeatureValue {
                domain: self.domain,
                index,
            });
        }

        let mut features = Vec::with_capacity(self.feature_count());
        features.extend_from_slice(raw);

        match self.domain {
            Domain::Heart => features.extend(heart_derived(raw)),
            Domain::Lung => features.extend(lung_derived(raw)),
            Domain::Liver => features.extend(liver_derived(raw)),
            Domain::Diabetes => features.extend(diabetes_derived(raw)),
        }

        // e.g. lung activity of -1 divides by zero
        if let Some(index) = features.iter().position(|v| !v.is_finite()) {
            return Err(PipelineError::InvalidFeatureValue {
                domain: self.domain,
                index,
            });
        }

        Ok(features)
    }

    /// Width of the engineered vector
    pub fn feature_count(&self) -> usize {
        self.domain.engineered_feature_count()
    }

    pub fn raw_feature_count(&self) -> usize {
        self.domain.raw_feature_count()
    }

    /// Feature names in training order
    pub fn feature_names(&self) -> Vec<&'static str> {
        match self.domain {
            Domain::Heart => HEART_FEATURES.to_vec(),
            Domain::Lung => LUNG_FEATURES.to_vec(),
            Domain::Liver => LIVER_FEATURES.to_vec(),
            Domain::Diabetes => DIABETES_FEATURES.to_vec(),
        }
    }
}

/// Convenience wrapper around [`FeatureExtractor::extract`]
pub fn engineer(domain: Domain, raw: &[f64]) -> Result<Vec<f64>, PipelineError> {
    FeatureExtractor::new(domain).extract(raw)
}

// Layout: age, sex, cp, trestbps, chol, fbs, restecg, thalach, exang, oldpeak, slope, ca, thal
fn heart_derived(raw: &[f64]) -> [f64; 5] {
    let (age, sex, trestbps, chol) = (raw[0], raw[1], raw[3], raw[4]);
    let (fbs, exang, oldpeak) = (raw[5], raw[8], raw[9]);

    [
        age * sex,
        chol / age,
        trestbps * chol / 10000.0,
        exang * oldpeak,
        fbs + exang,
    ]
}

// Layout: age, smoking, air_quality, alcohol, bmi, family_history, activity, occupation
fn lung_derived(raw: &[f64]) -> [f64; 4] {
    let (age, smoking, air_quality, alcohol) = (raw[0], raw[1], raw[2], raw[3]);
    let (bmi, family_history, activity, occupation) = (raw[4], raw[5], raw[6], raw[7]);

    [
        age * smoking * 2.0,
        smoking * air_quality / 100.0,
        bmi / (activity + 1.0),
        smoking * 2.0 + family_history * 1.5 + occupation * 1.5 + alcohol * 1.0,
    ]
}

// Layout: age, gender, total_bili, direct_bili, alk_phos, alt, ast, total_proteins, albumin, ag_ratio
fn liver_derived(raw: &[f64]) -> [f64; 5] {
    let (age, gender, total_bili, direct_bili) = (raw[0], raw[1], raw[2], raw[3]);
    let (alt, ast, total_proteins, albumin) = (raw[5], raw[6], raw[7], raw[8]);

    let enzyme_ratio = ast / (alt + RATIO_EPSILON);

    [
        age * gender,
        direct_bili / (total_bili + RATIO_EPSILON),
        enzyme_ratio,
        albumin / (total_proteins + RATIO_EPSILON),
        (total_bili + direct_bili) * enzyme_ratio,
    ]
}

// Layout: pregnancies, glucose, blood_pressure, skin_thickness, insulin, bmi, pedigree, age
fn diabetes_derived(raw: &[f64]) -> [f64; 5] {
    let (pregnancies, glucose, insulin, bmi, age) = (raw[0], raw[1], raw[4], raw[5], raw[7]);

    [
        glucose * bmi / 100.0,
        age * bmi / 100.0,
        glucose / (insulin + 1.0),
        pregnancies / (age + 1.0),
        glucose / 100.0 + bmi / 30.0 + age / 50.0,
    ]
}
