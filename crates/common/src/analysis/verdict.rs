//! Compliance verdicts and LLM reply parsing

use crate::llm::extract_json_object;
use serde::{Deserialize, Serialize};

/// Confidence given to a verdict whose reply could not be interpreted
pub const UNPARSEABLE_CONFIDENCE: f64 = 0.3;

/// Explanation given to a verdict whose reply could not be interpreted
pub const UNPARSEABLE_EXPLANATION: &str =
    "The analysis response could not be interpreted. Please review this requirement manually.";

const MISSING_EXPLANATION: &str = "No explanation was provided by the analysis service.";

/// Compliance class of one requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compliance {
    Compliant,
    NonCompliant,
}

impl Compliance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compliance::Compliant => "compliant",
            Compliance::NonCompliant => "non_compliant",
        }
    }
}

/// Outcome of analyzing one requirement/evidence pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceVerdict {
    pub requirement_id: String,
    pub compliance: Compliance,
    /// Fraction in [0, 1]
    pub confidence: Option<f64>,
    pub explanation: String,
    pub recommendations: Vec<String>,
    pub references: Vec<String>,
}

impl ComplianceVerdict {
    pub fn is_compliant(&self) -> bool {
        self.compliance == Compliance::Compliant
    }

    /// Confidence as a percentage in [0, 100]
    pub fn confidence_percent(&self) -> Option<f64> {
        self.confidence.map(|c| (c * 100.0).clamp(0.0, 100.0))
    }

    /// Verdict used when the reply is not the JSON object we asked for
    pub fn unparseable(requirement_id: &str) -> Self {
        Self {
            requirement_id: requirement_id.to_string(),
            compliance: Compliance::NonCompliant,
            confidence: Some(UNPARSEABLE_CONFIDENCE),
            explanation: UNPARSEABLE_EXPLANATION.to_string(),
            recommendations: vec!["Review the evidence for this requirement manually.".to_string()],
            references: Vec::new(),
        }
    }
}

/// Reply shape requested from the LLM. Fields are loosely typed because
/// models routinely return strings where booleans or numbers were asked for.
#[derive(Deserialize)]
struct RawVerdict {
    compliant: serde_json::Value,
    #[serde(default)]
    confidence: serde_json::Value,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    recommendations: serde_json::Value,
    #[serde(default)]
    references: serde_json::Value,
}

/// Interpret an LLM reply. Never fails: replies that are not a usable JSON
/// verdict become [`ComplianceVerdict::unparseable`].
pub fn parse_verdict(requirement_id: &str, content: &str) -> ComplianceVerdict {
    let Some(json) = extract_json_object(content) else {
        tracing::warn!(requirement_id, "LLM reply contained no JSON object");
        return ComplianceVerdict::unparseable(requirement_id);
    };

    let raw: RawVerdict = match serde_json::from_str(json) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(requirement_id, error = %e, "LLM reply was not a verdict");
            return ComplianceVerdict::unparseable(requirement_id);
        }
    };

    let Some(compliant) = as_bool(&raw.compliant) else {
        tracing::warn!(requirement_id, value = %raw.compliant, "LLM reply had no usable compliance flag");
        return ComplianceVerdict::unparseable(requirement_id);
    };

    let explanation = raw
        .explanation
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| MISSING_EXPLANATION.to_string());

    ComplianceVerdict {
        requirement_id: requirement_id.to_string(),
        compliance: if compliant { Compliance::Compliant } else { Compliance::NonCompliant },
        confidence: normalize_confidence(&raw.confidence),
        explanation,
        recommendations: as_string_list(&raw.recommendations),
        references: as_string_list(&raw.references),
    }
}

/// Bring a reported confidence into [0, 1].
///
/// Values above 1 and up to 100 are read as percentages; anything larger
/// is capped at 1 and negatives at 0. Strings such as "85%" are accepted.
pub fn normalize_confidence(value: &serde_json::Value) -> Option<f64> {
    let raw = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    let fraction = if raw > 1.0 && raw <= 100.0 { raw / 100.0 } else { raw };
    Some(fraction.clamp(0.0, 1.0))
}

fn as_bool(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "compliant" | "satisfactory" => Some(true),
            "false" | "no" | "non-compliant" | "non_compliant" | "not compliant" | "not satisfactory" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn as_string_list(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s.trim().to_string()),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_fenced_reply() {
        let reply = "```json\n{\"compliant\": true, \"confidence\": 0.9, \"explanation\": \"TUS report current\", \"recommendations\": [], \"references\": [\"CQI-9 3.2\"]}\n```";
        let verdict = parse_verdict("3.2", reply);
        assert!(verdict.is_compliant());
        assert_eq!(verdict.confidence, Some(0.9));
        assert_eq!(verdict.references, vec!["CQI-9 3.2"]);
        assert_eq!(verdict.confidence_percent(), Some(90.0));
    }

    #[test]
    fn test_unparseable_reply_needs_manual_review() {
        let verdict = parse_verdict("1.1", "I think it is probably fine.");
        assert_eq!(verdict.compliance, Compliance::NonCompliant);
        assert_eq!(verdict.confidence, Some(UNPARSEABLE_CONFIDENCE));
        assert_eq!(verdict.explanation, UNPARSEABLE_EXPLANATION);

        let verdict = parse_verdict("1.1", "{\"explanation\": \"missing flag\"}");
        assert_eq!(verdict.compliance, Compliance::NonCompliant);
        assert_eq!(verdict.confidence, Some(UNPARSEABLE_CONFIDENCE));
    }

    #[test]
    fn test_confidence_normalization() {
        assert_eq!(normalize_confidence(&json!(0.42)), Some(0.42));
        assert_eq!(normalize_confidence(&json!(85)), Some(0.85));
        assert_eq!(normalize_confidence(&json!("70%")), Some(0.7));
        assert_eq!(normalize_confidence(&json!(250)), Some(1.0));
        assert_eq!(normalize_confidence(&json!(-0.5)), Some(0.0));
        assert_eq!(normalize_confidence(&json!(1)), Some(1.0));
        assert_eq!(normalize_confidence(&json!(null)), None);
        assert_eq!(normalize_confidence(&json!("high")), None);
    }

    #[test]
    fn test_loose_field_types() {
        let verdict = parse_verdict(
            "2.1",
            r#"{"compliant": "No", "explanation": "  ", "recommendations": "Record every load"}"#,
        );
        assert_eq!(verdict.compliance, Compliance::NonCompliant);
        assert_eq!(verdict.confidence, None);
        assert_eq!(verdict.confidence_percent(), None);
        assert!(!verdict.explanation.is_empty());
        assert_eq!(verdict.recommendations, vec!["Record every load"]);
    }
}
