//! Core types for the sodam advisory pipeline
//!
//! This crate provides the shared vocabulary used across all other crates:
//! - Indexed documents and their metadata
//! - Advisory domains and collection mapping
//! - Request/response wire model (query, sources, actions, evaluation)
//! - Classification and decomposition types
//! - Streaming event model
//! - Error types

pub mod classify;
pub mod document;
pub mod domain;
pub mod error;
pub mod korean;
pub mod request;
pub mod response;

pub use classify::{ClassificationMethod, DomainClassification, SubQuery};
pub use document::{content_hash, Document, MetaValue};
pub use domain::DomainLabel;
pub use error::{Error, Result};
pub use request::{ChatRole, ChatTurn, CompanyProfile, QueryRequest, UserContext, UserType};
pub use response::{
    ActionSuggestion, ActionType, EvaluationReport, EvaluationScores, QueryResponse, RagasMetrics,
    SourceRef, StreamEvent, TimingMetrics,
};
