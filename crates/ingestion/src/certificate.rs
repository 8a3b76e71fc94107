//! Mill Test Certificate understanding through the LLM: structured data
//! extraction after upload and free-form questions about a document

use crate::errors::IngestionError;
use cqi9_common::llm::{extract_json_object, CompletionRequest, LlmClient};
use serde::Serialize;
use serde_json::{Map, Value};

const EXTRACTION_SYSTEM_PROMPT: &str = "You are an expert in analyzing steel mill test certificates. \
Extract structured information from the certificate text provided.

Tables of chemical composition and mechanical properties usually have a header row, then a row \
with the specification limits (e.g. \"< 0.25%\", \"17 - 110\"), then one row of measured values \
per product id. Keep product ids exactly as written. Be precise with decimal points and units. \
Leave genuinely missing values empty instead of inventing them.";

const QUERY_SYSTEM_PROMPT: &str = "You are a helpful assistant specialized in analyzing steel mill \
test certificates and heat treatment quality documents. Answer questions about the provided \
document text.

When discussing chemical composition or mechanical properties, always distinguish between the \
specification requirements (limits such as \"<0.25%\" or ranges such as \"17-110\") and the \
observed values for specific products, and explain whether the observed values comply.

Base your answers only on the document. If the information is not in the document, say so \
clearly. Use a professional tone and format tabular data as a Markdown table.";

/// Longest document text sent to the LLM
const MAX_DOCUMENT_CHARS: usize = 24_000;

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_DOCUMENT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Prompt for structured certificate extraction
pub fn build_extraction_prompt(text: &str) -> String {
    format!(
        "Extract structured information from this steel mill test certificate.\n\n\
         Respond with a JSON object containing these fields:\n\
         1. supplier_info: supplier name, address and contact details\n\
         2. material_info: material grade, specification, heat number, size and other identifiers\n\
         3. chemical_composition: for each element an array whose first item is the specification \
            requirement and whose following items are the measured values per product id\n\
         4. mechanical_properties: the same array layout for each property (Y.S., T.S., EL%...)\n\
         5. additional_info: certifications, testing standards or notes\n\n\
         <document>\n{}\n</document>",
        truncate(text)
    )
}

/// Ask the LLM for supplier, material, chemistry and mechanical data
pub async fn extract_certificate_data(
    llm: &dyn LlmClient,
    text: &str,
    temperature: f32,
) -> Result<Value, IngestionError> {
    let request = CompletionRequest::new(build_extraction_prompt(text))
        .with_system(EXTRACTION_SYSTEM_PROMPT)
        .with_temperature(temperature);

    let reply = llm
        .complete(&request)
        .await
        .map_err(|e| IngestionError::StructuredExtraction(e.user_message()))?;

    let json = extract_json_object(&reply)
        .ok_or_else(|| IngestionError::StructuredExtraction("LLM reply contained no JSON object".to_string()))?;
    let data: Value = serde_json::from_str(json)
        .map_err(|e| IngestionError::StructuredExtraction(format!("Error parsing LLM response: {}", e)))?;

    if !data.is_object() {
        return Err(IngestionError::StructuredExtraction("Expected a JSON object".to_string()));
    }
    Ok(normalize_certificate_data(data))
}

/// Bring tables given as `{requirements, products: [{values}]}` into the
/// per-column array layout: requirement first, then one value per product
pub fn normalize_certificate_data(mut data: Value) -> Value {
    for key in ["chemical_composition", "mechanical_properties"] {
        if let Some(table) = data.get_mut(key) {
            if let Some(columns) = columns_from_products(table) {
                *table = Value::Object(columns);
            }
        }
    }
    data
}

fn columns_from_products(table: &Value) -> Option<Map<String, Value>> {
    let requirements = table.get("requirements")?.as_object()?;
    let products = table.get("products")?.as_array()?;

    let columns = requirements
        .iter()
        .map(|(name, requirement)| {
            let mut values = vec![requirement.clone()];
            values.extend(products.iter().map(|product| {
                product
                    .get("values")
                    .and_then(|v| v.get(name))
                    .cloned()
                    .unwrap_or(Value::Null)
            }));
            (name.clone(), Value::Array(values))
        })
        .collect();
    Some(columns)
}

/// How complete the structured data is, per part and weighted overall (0-100)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Completeness {
    pub supplier_info: f64,
    pub material_info: f64,
    pub chemical_composition: f64,
    pub mechanical_properties: f64,
    pub overall: f64,
}

fn entry_count(value: Option<&Value>) -> usize {
    match value {
        Some(Value::Object(map)) => map.len(),
        Some(Value::Array(items)) => items.len(),
        _ => 0,
    }
}

fn score(count: usize, per_entry: f64) -> f64 {
    (count as f64 * per_entry).min(100.0)
}

pub fn assess_completeness(data: &Value) -> Completeness {
    let supplier_info = score(entry_count(data.get("supplier_info")), 20.0);
    let material_info = score(entry_count(data.get("material_info")), 20.0);
    let chemical_composition = score(entry_count(data.get("chemical_composition")), 10.0);
    let mechanical_properties = score(entry_count(data.get("mechanical_properties")), 20.0);

    Completeness {
        supplier_info,
        material_info,
        chemical_composition,
        mechanical_properties,
        overall: supplier_info * 0.2
            + material_info * 0.3
            + chemical_composition * 0.3
            + mechanical_properties * 0.2,
    }
}

/// Answer a free-form question about a processed document
pub async fn answer_query(
    llm: &dyn LlmClient,
    document_text: &str,
    question: &str,
    temperature: f32,
    max_tokens: u32,
) -> cqi9_common::Result<String> {
    if document_text.trim().len() < 100 {
        tracing::warn!(chars = document_text.len(), "Document text is very short for a query");
    }
    let prompt = format!(
        "Question: {}\n\nDocument content:\n{}",
        question.trim(),
        truncate(document_text)
    );
    let request = CompletionRequest::new(prompt)
        .with_system(QUERY_SYSTEM_PROMPT)
        .with_temperature(temperature)
        .with_max_tokens(max_tokens);
    llm.complete(&request).await
}
