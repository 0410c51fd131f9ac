//! propertyedge-valuation library interface
//!
//! Evidence pipeline for UK residential valuations: location resolution,
//! comparable sales, area datasets, the refinement chain, and the insight
//! builders, fronted by a cached `ValuationService`.

pub mod cache;
pub mod config;
pub mod error;
pub mod insights;
pub mod pipeline;
pub mod refine;
pub mod service;
pub mod sources;
pub mod stats;
pub mod types;

pub use crate::cache::{CacheKey, ValuationCache};
pub use crate::config::ValuationConfig;
pub use crate::error::{SourceError, ValuationError, ValuationResult};
pub use crate::pipeline::{PipelineSources, ValuationPipeline};
pub use crate::service::{ValuationOutcome, ValuationService};
pub use crate::types::{EvidenceBundle, PropertyCategory, SubjectProperty, Tenure};
