//! API handlers module

pub mod analyze;
pub mod assessments;
pub mod health;
pub mod jobs;
pub mod knowledge;
pub mod query;
pub mod upload;
