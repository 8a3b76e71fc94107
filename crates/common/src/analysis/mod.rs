//! Compliance analysis
//!
//! Turns requirement/evidence pairs into verdicts through the LLM:
//! - single requirement analysis with knowledge-store context
//! - concurrent section analysis with per-requirement state
//! - whole-form reports with a generated summary

mod analyzer;
mod prompt;
mod report;
mod section;
mod verdict;

pub use analyzer::{AnalysisRequest, AnalyzerOptions, ComplianceAnalyzer};
pub use prompt::{build_analysis_prompt, build_summary_prompt, SYSTEM_PROMPT};
pub use report::{
    relevant_requirements, FormAnalysisReport, FormEvidence, SUMMARY_FALLBACK_COMPLIANT,
    SUMMARY_FALLBACK_NON_COMPLIANT,
};
pub use section::{
    failure_message, RequirementState, SectionReport, SectionTracker, ANALYSIS_FAILED_FALLBACK,
};
pub use verdict::{
    normalize_confidence, parse_verdict, Compliance, ComplianceVerdict, UNPARSEABLE_CONFIDENCE,
    UNPARSEABLE_EXPLANATION,
};
