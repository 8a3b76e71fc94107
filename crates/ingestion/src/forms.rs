//! CQI-9 form recognition
//!
//! Pattern based parsing of extracted document text: the kind of form,
//! the assessment cover sheet, job audit fields, objective evidence per
//! requirement and the equipment/test details of TUS and SAT reports.

use crate::errors::IngestionError;
use cqi9_common::knowledge::FormType;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Fields read from the assessment cover sheet
const COVER_SHEET_PATTERNS: &[(&str, &str)] = &[
    ("supplier_name", r"(?i)(?:Supplier|Organization|Company)\s+Name:?[ \t]*([^,\n\.]{2,50})"),
    ("supplier_code", r"(?i)(?:Supplier|Vendor|Organization)\s+Code:?[ \t]*([A-Za-z0-9\-]{2,20})"),
    ("supplier_address", r"(?i)(?:Address|Location):?[ \t]*([^,\n\.]{5,100})"),
    (
        "audit_date",
        r"(?i)(?:Assessment|Audit)\s+Date:?[ \t]*(\d{1,4}[-/\.]\d{1,2}[-/\.]\d{1,4}|[A-Za-z]+ \d{1,2},? \d{4})",
    ),
    ("auditor_name", r"(?i)(?:Lead\s+)?(?:Assessor|Auditor)(?:'s)?\s+Name:?[ \t]*([A-Za-z\. ]{2,50})"),
    ("audit_type", r"(?i)Assessment\s+Type:?[ \t]*([A-Za-z ]{2,30})"),
    ("audit_scope", r"(?i)(?:Assessment|Audit)\s+Scope:?[ \t]*([^,\n\.]{5,100})"),
];

/// Fields read from the job audit part of the assessment
const JOB_AUDIT_PATTERNS: &[(&str, &str)] = &[
    ("job_number", r"(?i)(?:Job|Part)\s*(?:Number|#|ID):?[ \t]*([A-Za-z0-9\-]{2,30})"),
    ("part_name", r"(?i)Part\s+Name:?[ \t]*([A-Za-z0-9 \-]{2,50})"),
    ("material_spec", r"(?i)Material\s+(?:Specification|Spec):?[ \t]*([A-Za-z0-9 \-\.]{2,50})"),
    ("heat_treat_spec", r"(?i)Heat\s+Treat(?:ment)?\s+(?:Specification|Spec):?[ \t]*([A-Za-z0-9 \-\.]{2,50})"),
    ("equipment_used", r"(?i)Equipment\s+(?:Used|Utilized|Applied):?[ \t]*([A-Za-z0-9 \-\.]{2,100})"),
    ("process_class", r"(?i)Process\s+(?:Table\s+)?Class:?[ \t]*([A-Za-z0-9 \-\.]{1,20})"),
    ("set_temperature", r"(?i)Set\s+Temperature:?\s*(\d+\.?\d*)\s*[°℃CF]"),
    ("actual_temperature", r"(?i)Actual\s+Temperature:?\s*(\d+\.?\d*)\s*[°℃CF]"),
    ("soak_time", r"(?i)Soak\s+Time:?\s*(\d+\.?\d*)\s*(?:min|minutes)"),
    ("quench_media", r"(?i)Quench\s+Media:?[ \t]*([A-Za-z0-9 \-\.]{2,30})"),
    ("quench_temperature", r"(?i)Quench\s+Temperature:?\s*(\d+\.?\d*)\s*[°℃CF]"),
    ("quench_time", r"(?i)Quench\s+Time:?\s*(\d+\.?\d*)\s*(?:sec|min|seconds|minutes)"),
];

const TUS_EQUIPMENT_PATTERNS: &[(&str, &str)] = &[
    ("furnace_id", r"(?i)(?:furnace|equipment)\s+id[^:\n]*:?\s*([A-Za-z0-9\-]+)"),
    ("manufacturer", r"(?i)(?:furnace|equipment)\s+manufacturer[^:\n]*:?[ \t]*([A-Za-z0-9\- ]+)"),
    ("model", r"(?i)\bmodel[^:\n]*:?[ \t]*([A-Za-z0-9\- ]+)"),
    ("serial_number", r"(?i)serial[^:\n]*?(?:number|no|#)[^:\n]*:?\s*([A-Za-z0-9\-]+)"),
];

const SAT_EQUIPMENT_PATTERNS: &[(&str, &str)] = &[
    ("equipment_id", r"(?i)(?:equipment|system)\s+id[^:\n]*:?\s*([A-Za-z0-9\-]+)"),
    ("manufacturer", r"(?i)(?:equipment|system)\s+manufacturer[^:\n]*:?[ \t]*([A-Za-z0-9\- ]+)"),
    ("instrument_id", r"(?i)(?:instrument|controller)\s+id[^:\n]*:?\s*([A-Za-z0-9\-]+)"),
];

const TEST_DATE_PATTERN: &str =
    r"(?i)(?:test|survey)\s+date[^:\n]*:?\s*(\d{1,2}[/-]\d{1,2}[/-]\d{2,4}|\d{1,2} [A-Za-z]+ \d{2,4}|\d{4}-\d{2}-\d{2})";
const TEST_NUMBER_PATTERN: &str = r"(?i)(?:test|survey)\s+(?:number|no|#)[^:\n]*:?\s*([A-Za-z0-9\-]+)";

const TUS_TEST_PATTERNS: &[(&str, &str)] = &[
    ("test_date", TEST_DATE_PATTERN),
    ("test_number", TEST_NUMBER_PATTERN),
    ("setpoint", r"(?i)set\s*point[^:\n\d]*:?\s*(\d+(?:\.\d+)?)\s*[°℃C]"),
    ("uniformity_tolerance", r"(?i)(?:uniformity|tolerance)[^:\n\d]*:?\s*(?:±|\+/-)?\s*(\d+(?:\.\d+)?)\s*[°℃C]"),
];

const SAT_TEST_PATTERNS: &[(&str, &str)] = &[
    ("test_date", TEST_DATE_PATTERN),
    ("test_number", TEST_NUMBER_PATTERN),
    ("accuracy_tolerance", r"(?i)(?:accuracy|tolerance)[^:\n\d]*:?\s*(?:±|\+/-)?\s*(\d+(?:\.\d+)?)\s*[°℃C]"),
];

/// Checked in order, first hit wins
const FORM_TYPE_PATTERNS: &[(FormType, &str)] = &[
    (FormType::TemperatureUniformitySurvey, r"(?i)temperature\s+uniformity\s+survey|\bTUS\s+report"),
    (FormType::SystemAccuracyTest, r"(?i)system\s+accuracy\s+test|\bSAT\s+report"),
    (FormType::ThermocoupleCalibration, r"(?i)thermocouple\s+calibration"),
    (FormType::InstrumentationCalibration, r"(?i)instrumentation\s+calibration"),
    (FormType::HeatTreatmentRecord, r"(?i)heat\s+treat(?:ment)?\s+record"),
    (FormType::ProcessCapability, r"(?i)process\s+capability|capability\s+study"),
    (FormType::EquipmentMaintenance, r"(?i)equipment\s+maintenance|maintenance\s+record"),
];

/// Assessment sections in document order: requirement prefix and heading
const SECTION_HEADINGS: &[(&str, &str)] = &[
    ("1", r"(?i)Section\s+1\b[^\n]*"),
    ("2", r"(?i)Section\s+2\b[^\n]*"),
    ("3", r"(?i)Section\s+3\b[^\n]*"),
    ("JA", r"(?i)Job\s+Audit\b[^\n]*"),
];

/// TUS/SAT pass-fail statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Conformance {
    Pass,
    Fail,
}

/// Equipment and test details of a TUS or SAT report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurveyDetails {
    pub equipment_info: BTreeMap<String, String>,
    pub test_info: BTreeMap<String, String>,
    pub conformance: Option<Conformance>,
}

/// Content of a CQI-9 Heat Treat System Assessment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditForm {
    pub cover_sheet: BTreeMap<String, String>,
    pub job_audit: BTreeMap<String, String>,
    /// Objective evidence by requirement id
    pub evidence: BTreeMap<String, String>,
    /// Every requirement id found, with or without evidence
    pub requirement_ids: Vec<String>,
}

impl AuditForm {
    pub fn supplier(&self) -> Option<&str> {
        self.cover_sheet.get("supplier_name").map(String::as_str)
    }

    pub fn auditor(&self) -> Option<&str> {
        self.cover_sheet.get("auditor_name").map(String::as_str)
    }

    pub fn audit_date(&self) -> Option<&str> {
        self.cover_sheet.get("audit_date").map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.cover_sheet.is_empty() && self.job_audit.is_empty() && self.requirement_ids.is_empty()
    }
}

/// Everything recognized in one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub form_type: FormType,
    pub audit: AuditForm,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub survey: Option<SurveyDetails>,
}

struct Section {
    prefix: &'static str,
    heading: Regex,
    /// Requirement numbers at the start of a line
    line_marker: Regex,
    /// Requirement numbers anywhere
    marker: Regex,
}

type FieldPatterns = Vec<(&'static str, Regex)>;

/// Compiled form patterns
pub struct FormParser {
    form_types: Vec<(FormType, Regex)>,
    cover_sheet: FieldPatterns,
    job_audit: FieldPatterns,
    tus_equipment: FieldPatterns,
    tus_test: FieldPatterns,
    sat_equipment: FieldPatterns,
    sat_test: FieldPatterns,
    sections: Vec<Section>,
    evidence: Regex,
    inline_evidence: Regex,
    any_marker: Regex,
    sentence_break: Regex,
    conformance: Regex,
}

fn compile(pattern: &str) -> Result<Regex, IngestionError> {
    Regex::new(pattern).map_err(|e| IngestionError::ConfigError(format!("Invalid form pattern {}: {}", pattern, e)))
}

fn compile_fields(patterns: &[(&'static str, &str)]) -> Result<FieldPatterns, IngestionError> {
    patterns
        .iter()
        .map(|(name, pattern)| Ok((*name, compile(pattern)?)))
        .collect()
}

fn marker_pattern(prefix: &str) -> String {
    if prefix == "JA" {
        r"\b(JA\.\d{1,2})\b".to_string()
    } else {
        format!(r"\b({}\.\d{{1,2}})\b", prefix)
    }
}

fn clean_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_placeholder(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("n/a") || value == "-"
}

impl FormParser {
    pub fn new() -> Result<Self, IngestionError> {
        let form_types = FORM_TYPE_PATTERNS
            .iter()
            .map(|(form_type, pattern)| Ok((*form_type, compile(pattern)?)))
            .collect::<Result<Vec<_>, IngestionError>>()?;

        let sections = SECTION_HEADINGS
            .iter()
            .map(|(prefix, heading)| {
                let marker = marker_pattern(prefix);
                Ok(Section {
                    prefix: *prefix,
                    heading: compile(heading)?,
                    line_marker: compile(&format!(r"(?m)^[ \t]*{}", marker))?,
                    marker: compile(&marker)?,
                })
            })
            .collect::<Result<Vec<_>, IngestionError>>()?;

        Ok(Self {
            form_types,
            cover_sheet: compile_fields(COVER_SHEET_PATTERNS)?,
            job_audit: compile_fields(JOB_AUDIT_PATTERNS)?,
            tus_equipment: compile_fields(TUS_EQUIPMENT_PATTERNS)?,
            tus_test: compile_fields(TUS_TEST_PATTERNS)?,
            sat_equipment: compile_fields(SAT_EQUIPMENT_PATTERNS)?,
            sat_test: compile_fields(SAT_TEST_PATTERNS)?,
            sections,
            evidence: compile(r"(?i)Evidence\s*:\s*([^\n]+)")?,
            inline_evidence: compile(
                r"(?i)\b([123]\.\d{1,2}|JA\.\d{1,2})\b[^\n]*?Evidence\s*:\s*([^\n]+)",
            )?,
            any_marker: compile(r"\b([123]\.\d{1,2}|JA\.\d{1,2})\b")?,
            sentence_break: compile(r"[.!?]\s+")?,
            conformance: compile(
                r"(?i)(?:conformance|compliance|result)[^\n]*?:?\s*(pass|fail|conforms|does\s+not\s+conform)",
            )?,
        })
    }

    /// Identify the kind of CQI-9 form from its text
    pub fn identify_form_type(&self, text: &str) -> FormType {
        self.form_types
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(form_type, _)| *form_type)
            .unwrap_or(FormType::Unknown)
    }

    /// Parse everything recognizable from a document's text
    pub fn parse(&self, text: &str) -> ParsedDocument {
        let form_type = self.identify_form_type(text);
        ParsedDocument {
            form_type,
            audit: self.parse_audit_form(text),
            survey: self.extract_survey_details(text, form_type),
        }
    }

    /// Parse the CQI-9 assessment layout
    pub fn parse_audit_form(&self, text: &str) -> AuditForm {
        let mut form = AuditForm {
            cover_sheet: extract_fields(&self.cover_sheet, text),
            job_audit: extract_fields(&self.job_audit, text),
            ..AuditForm::default()
        };

        for (prefix, body) in self.section_bodies(text) {
            self.parse_section(prefix, body, &mut form);
        }

        // No recognizable sections: requirement ids followed by evidence anywhere
        if form.requirement_ids.is_empty() {
            for caps in self.inline_evidence.captures_iter(text) {
                let (Some(id), Some(evidence)) = (caps.get(1), caps.get(2)) else { continue };
                record(&mut form, id.as_str(), &clean_value(evidence.as_str()));
            }
        }

        // Last resort: just the requirement numbers
        if form.requirement_ids.is_empty() {
            for caps in self.any_marker.captures_iter(text) {
                if let Some(id) = caps.get(1) {
                    record(&mut form, id.as_str(), "");
                }
            }
        }

        tracing::debug!(
            cover_fields = form.cover_sheet.len(),
            job_fields = form.job_audit.len(),
            requirements = form.requirement_ids.len(),
            with_evidence = form.evidence.len(),
            "Parsed audit form"
        );
        form
    }

    /// Section bodies in document order, each running to the next heading
    fn section_bodies<'a>(&'a self, text: &'a str) -> Vec<(&'a str, &'a str)> {
        let mut found: Vec<(usize, usize, &str)> = self
            .sections
            .iter()
            .filter_map(|s| s.heading.find(text).map(|m| (m.start(), m.end(), s.prefix)))
            .collect();
        found.sort_by_key(|(start, _, _)| *start);

        found
            .iter()
            .enumerate()
            .map(|(i, &(_, body_start, prefix))| {
                let end = found
                    .get(i + 1)
                    .map(|&(next_start, _, _)| next_start)
                    .unwrap_or(text.len())
                    .max(body_start);
                (prefix, &text[body_start..end])
            })
            .collect()
    }

    fn parse_section(&self, prefix: &str, body: &str, form: &mut AuditForm) {
        let Some(section) = self.sections.iter().find(|s| s.prefix == prefix) else { return };

        let mut markers: Vec<(usize, usize, &str)> = section
            .line_marker
            .captures_iter(body)
            .filter_map(|c| c.get(1).map(|m| (m.start(), m.end(), m.as_str())))
            .collect();
        if markers.is_empty() {
            markers = section
                .marker
                .captures_iter(body)
                .filter_map(|c| c.get(1).map(|m| (m.start(), m.end(), m.as_str())))
                .collect();
        }

        // Only the first mention of a number starts its block
        let mut seen = HashSet::new();
        markers.retain(|(_, _, id)| seen.insert(*id));

        for (i, &(_, block_start, id)) in markers.iter().enumerate() {
            let end = markers.get(i + 1).map(|&(next, _, _)| next).unwrap_or(body.len());
            let block = &body[block_start..end.max(block_start)];
            let evidence = self.block_evidence(block);
            record(form, id, &evidence);
        }
    }

    /// Objective evidence of one requirement block: the text after an
    /// "Evidence:" label, else the last sentence of a multi-sentence block
    fn block_evidence(&self, block: &str) -> String {
        if let Some(m) = self.evidence.captures(block).and_then(|c| c.get(1)) {
            return clean_value(m.as_str());
        }
        let sentences: Vec<&str> = self
            .sentence_break
            .split(block.trim())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        match sentences.as_slice() {
            [_, .., last] => clean_value(last),
            _ => String::new(),
        }
    }

    /// Equipment and test details of TUS and SAT reports
    pub fn extract_survey_details(&self, text: &str, form_type: FormType) -> Option<SurveyDetails> {
        let (equipment, test) = match form_type {
            FormType::TemperatureUniformitySurvey => (&self.tus_equipment, &self.tus_test),
            FormType::SystemAccuracyTest => (&self.sat_equipment, &self.sat_test),
            _ => return None,
        };

        let conformance = self
            .conformance
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| {
                let result = m.as_str().to_ascii_lowercase();
                if result.starts_with("fail") || result.starts_with("does") {
                    Conformance::Fail
                } else {
                    Conformance::Pass
                }
            });

        Some(SurveyDetails {
            equipment_info: extract_fields(equipment, text),
            test_info: extract_fields(test, text),
            conformance,
        })
    }
}

fn extract_fields(patterns: &FieldPatterns, text: &str) -> BTreeMap<String, String> {
    patterns
        .iter()
        .filter_map(|(name, re)| {
            let value = clean_value(re.captures(text)?.get(1)?.as_str());
            (!value.is_empty()).then(|| (name.to_string(), value))
        })
        .collect()
}

fn record(form: &mut AuditForm, id: &str, evidence: &str) {
    if !form.requirement_ids.iter().any(|r| r == id) {
        form.requirement_ids.push(id.to_string());
    }
    if !is_placeholder(evidence) {
        form.evidence.entry(id.to_string()).or_insert_with(|| evidence.to_string());
    }
}
