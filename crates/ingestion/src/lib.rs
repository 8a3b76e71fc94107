//! CQI-9 Form Intake Library
//!
//! Turns uploaded forms and certificates into text and evidence:
//! - Upload validation and storage
//! - Text extraction (LLMWhisperer OCR or local PDF text)
//! - CQI-9 form recognition and objective evidence parsing
//! - Structured Mill Test Certificate data through the LLM

pub mod certificate;
pub mod errors;
pub mod forms;
pub mod ocr;
pub mod pdf;
pub mod processor;
pub mod storage;

pub use errors::IngestionError;
pub use forms::{FormParser, ParsedDocument};
pub use ocr::{create_text_extractor, ExtractedText, ExtractionSource, TextExtractor};
pub use processor::{extract_document, DocumentExtraction, IntakeOutcome, IntakeProcessor};
pub use storage::{StoredUpload, UploadStore};
