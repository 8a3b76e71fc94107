//! Prompt construction for compliance analysis

use crate::knowledge::RequirementContext;
use std::fmt::Write;

pub const SYSTEM_PROMPT: &str = "You are a CQI-9 heat treatment quality audit expert.";

/// Requirements under 1.1 are judged on how explanatory the evidence is
fn needs_explanatory_evidence(requirement_id: &str) -> bool {
    requirement_id == "1.1" || requirement_id.starts_with("1.1.")
}

/// Build the user prompt for one requirement/evidence pair.
///
/// The evidence is wrapped in `<evidence>` tags so that it cannot be
/// confused with the instructions around it.
pub fn build_analysis_prompt(
    requirement_id: &str,
    requirement_text: &str,
    context: Option<&RequirementContext>,
    evidence: &str,
) -> String {
    let mut prompt = String::with_capacity(2048 + evidence.len());

    prompt.push_str(
        "You are a CQI-9 audit assessment expert analyzing objective evidence for heat \
         treatment quality requirements.\n\n",
    );
    let _ = writeln!(prompt, "Requirement ID: {}", requirement_id);
    let _ = writeln!(prompt, "Requirement: {}", requirement_text.trim());

    if let Some(ctx) = context {
        write_context(&mut prompt, ctx);
    }

    prompt.push_str("\nObjective Evidence provided:\n<evidence>\n");
    prompt.push_str(evidence.trim());
    prompt.push_str("\n</evidence>\n\n");

    prompt.push_str("Evaluate whether the objective evidence satisfies the requirement.\n");
    if needs_explanatory_evidence(requirement_id) {
        prompt.push_str(
            "Consider:\n\
             1. Is the evidence relevant to the specific requirement?\n\
             2. Is the evidence detailed and explanatory, rather than simple yes/no statements?\n\
             3. Does the evidence give specific examples, details or document references?\n\
             4. Can you determine from the evidence whether the requirement is met?\n",
        );
    }

    prompt.push_str(
        "\nRules:\n\
         - Evidence consisting only of simple answers such as \"yes\", \"no\" or \"followed\" \
           is NOT SATISFACTORY",
    );
    if needs_explanatory_evidence(requirement_id) {
        prompt.push_str(", with the remark \"very limited objective evidence observed\"");
    }
    prompt.push_str(
        ".\n\
         - Evidence must be explanatory with specific details to be considered satisfactory.\n\
         - Base the assessment solely on the evidence provided, not on assumptions.\n\
         - Compare any measured values against the process table limits listed above.\n\n\
         Respond with a single JSON object and nothing else:\n\
         {\n\
           \"compliant\": true or false,\n\
           \"confidence\": number between 0.0 and 1.0,\n\
           \"explanation\": \"why the evidence is or is not satisfactory\",\n\
           \"recommendations\": [\"actions that would close any gap\"],\n\
           \"references\": [\"CQI-9 clauses or tables relied on\"]\n\
         }\n",
    );

    prompt
}

fn write_context(prompt: &mut String, ctx: &RequirementContext) {
    if let Some(section) = &ctx.section {
        let _ = writeln!(prompt, "Section: {} {}", section.number, section.title);
    }
    let requirement = &ctx.requirement;
    let _ = writeln!(
        prompt,
        "Category: {}, criticality: {}",
        requirement.category.as_str(),
        requirement.criticality.as_str()
    );
    if !requirement.rationale.is_empty() {
        let _ = writeln!(prompt, "Rationale: {}", requirement.rationale);
    }
    if !requirement.verification_method.is_empty() {
        let _ = writeln!(prompt, "Verification method: {}", requirement.verification_method);
    }

    if !ctx.outgoing.is_empty() || !ctx.incoming.is_empty() {
        prompt.push_str("\nRelated requirements:\n");
        for related in &ctx.outgoing {
            let _ = writeln!(prompt, "- {} {}: {}", related.relationship, related.id, related.text);
        }
        for related in &ctx.incoming {
            let _ = writeln!(
                prompt,
                "- {} (from {}): {}",
                related.relationship, related.id, related.text
            );
        }
    }

    for table in &ctx.process_tables {
        let _ = writeln!(prompt, "\nProcess table {} ({}):", table.id, table.name);
        for row in &table.tolerances {
            let unit = table.units.get(&row.parameter).map(String::as_str);
            let _ = writeln!(prompt, "- {}: {}", row.parameter, row.describe(unit));
        }
    }
}

/// Prompt asking for an audit summary over several verdicts
pub fn build_summary_prompt(form_title: &str, overall_compliance: bool, findings: &str) -> String {
    format!(
        "Generate a concise summary of the CQI-9 compliance analysis of a {} based on the \
         following findings.\n\n\
         Overall compliance: {}\n\n\
         Detailed findings:\n{}\n\n\
         Provide a clear, professional summary that highlights key aspects of compliance or \
         non-compliance, major findings and critical issues if any. Keep it focused and actionable.",
        form_title, overall_compliance, findings
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::KnowledgeStore;
    use crate::llm::tagged;

    #[test]
    fn test_prompt_includes_context_and_tagged_evidence() {
        let store = KnowledgeStore::bundled().unwrap();
        let ctx = store.context("3.2").unwrap();
        let prompt = build_analysis_prompt("3.2", &ctx.requirement.text, Some(&ctx), "  TUS done quarterly  ");

        assert!(prompt.contains("Requirement ID: 3.2"));
        assert!(prompt.contains("Section: 3 Equipment"));
        assert!(prompt.contains("DEPENDS_ON 3.1"));
        assert!(prompt.contains("Process table PT-PYROMETRY"));
        assert_eq!(tagged(&prompt, "evidence"), Some("TUS done quarterly"));
        assert!(!prompt.contains("very limited objective evidence"));
    }

    #[test]
    fn test_explanatory_rule_for_section_1_1() {
        let prompt = build_analysis_prompt("1.1", "Dedicated heat treat person", None, "yes");
        assert!(prompt.contains("very limited objective evidence observed"));
        let prompt = build_analysis_prompt("1.10", "Other", None, "yes");
        assert!(!prompt.contains("very limited objective evidence observed"));
    }
}
