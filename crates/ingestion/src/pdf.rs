//! PDF text extraction module
//!
//! Extracts text content from PDF files using lopdf. Pages are read with
//! lopdf's own text extraction first; pages it cannot decode fall back to
//! scanning the raw content stream for text operators.

use crate::errors::IngestionError;
use std::path::Path;
use tracing::{debug, warn};

/// Text of a PDF with its page count
#[derive(Debug, Clone)]
pub struct PdfText {
    pub text: String,
    pub pages: usize,
}

/// Extract text content from a PDF file
pub fn extract_text_from_pdf(path: &Path) -> Result<PdfText, IngestionError> {
    let doc = lopdf::Document::load(path).map_err(|e| IngestionError::PdfParseError {
        path: path.display().to_string(),
        message: format!("Failed to load PDF: {}", e),
    })?;
    extract_document_text(&doc, &path.display().to_string())
}

/// Extract text content from PDF bytes
pub fn extract_text_from_bytes(bytes: &[u8], name: &str) -> Result<PdfText, IngestionError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| IngestionError::PdfParseError {
        path: name.to_string(),
        message: format!("Failed to load PDF: {}", e),
    })?;
    extract_document_text(&doc, name)
}

fn extract_document_text(doc: &lopdf::Document, name: &str) -> Result<PdfText, IngestionError> {
    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "Extracting text from PDF");

    let mut text = String::new();
    for (&page_num, &page_id) in pages.iter() {
        let page_text = match doc.extract_text(&[page_num]) {
            Ok(t) if !t.trim().is_empty() => t,
            Ok(_) | Err(_) => match doc.get_page_content(page_id) {
                Ok(content) => extract_text_from_content(&content),
                Err(e) => {
                    warn!(page = page_num, error = %e, "Failed to extract text from page, skipping");
                    continue;
                }
            },
        };
        text.push_str(&page_text);
        text.push('\n');
    }

    let cleaned = clean_text(&text);
    if cleaned.trim().is_empty() {
        return Err(IngestionError::EmptyDocument(name.to_string()));
    }

    debug!(
        original_len = text.len(),
        cleaned_len = cleaned.len(),
        "Text extraction complete"
    );

    Ok(PdfText { text: cleaned, pages: pages.len() })
}

/// Extract text from a PDF content stream
fn extract_text_from_content(content: &[u8]) -> String {
    // Text lives between BT and ET operators
    let content_str = String::from_utf8_lossy(content);
    let mut text = String::new();
    let mut in_text_block = false;
    let mut current_text = String::new();

    for line in content_str.lines() {
        let trimmed = line.trim();

        if trimmed == "BT" {
            in_text_block = true;
            continue;
        }

        if trimmed == "ET" {
            in_text_block = false;
            if !current_text.is_empty() {
                text.push_str(&current_text);
                text.push('\n');
                current_text.clear();
            }
            continue;
        }

        if in_text_block {
            if let Some(text_content) = extract_text_from_operator(trimmed) {
                current_text.push_str(&text_content);
            }
        }
    }

    text
}

/// Extract text from a text-showing operator: Tj, ', " or TJ
fn extract_text_from_operator(line: &str) -> Option<String> {
    if line.ends_with("TJ") {
        let mut result = String::new();
        let mut depth = 0usize;
        let mut current = String::new();
        let mut escaped = false;

        for ch in line.chars() {
            match ch {
                _ if escaped => {
                    current.push('\\');
                    current.push(ch);
                    escaped = false;
                }
                '\\' if depth > 0 => escaped = true,
                '(' => depth += 1,
                ')' if depth > 0 => {
                    depth -= 1;
                    if depth == 0 {
                        result.push_str(&decode_pdf_string(&current));
                        current.clear();
                    }
                }
                _ if depth > 0 => current.push(ch),
                _ => {}
            }
        }

        return (!result.is_empty()).then_some(result);
    }

    if line.ends_with("Tj") || line.ends_with('\'') || line.ends_with('"') {
        let start = line.find('(')?;
        let end = line.rfind(')')?;
        if end > start {
            return Some(decode_pdf_string(&line[start + 1..end]));
        }
    }

    None
}

/// Decode PDF string escapes
fn decode_pdf_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some(d @ '0'..='7') => {
                // Octal escape, up to three digits
                let mut value = d.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(next) => {
                            value = value * 8 + next;
                            chars.next();
                        }
                        None => break,
                    }
                }
                if let Some(c) = char::from_u32(value) {
                    result.push(c);
                }
            }
            Some(c) => result.push(c),
            None => {}
        }
    }

    result
}

/// Normalize extracted text: collapse runs of spaces within each line,
/// drop blank lines, strip byte order marks and typographic quotes
pub fn clean_text(text: &str) -> String {
    text.replace('\u{FEFF}', "")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text() {
        let input = "\u{FEFF}Hello   World\n\n  \u{201C}Test\u{201D}  \n";
        assert_eq!(clean_text(input), "Hello World\n\"Test\"");
    }

    #[test]
    fn test_decode_pdf_string() {
        assert_eq!(decode_pdf_string("Hello\\nWorld"), "Hello\nWorld");
        assert_eq!(decode_pdf_string("Test\\(paren\\)"), "Test(paren)");
        assert_eq!(decode_pdf_string("\\260C"), "°C");
    }

    #[test]
    fn test_content_stream_fallback() {
        let content = b"BT\n/F1 12 Tf\n(Section 3 Equipment) Tj\nET\nBT\n[(T) 120 (US report)] TJ\nET\n";
        let text = extract_text_from_content(content);
        assert_eq!(text, "Section 3 Equipment\nTUS report\n");
    }

    #[test]
    fn test_invalid_pdf_is_parse_error() {
        let err = extract_text_from_bytes(b"not a pdf", "bogus.pdf").unwrap_err();
        assert!(matches!(err, IngestionError::PdfParseError { .. }));
    }
}
