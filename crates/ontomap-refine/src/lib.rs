//! Concrete refiner implementations for the ontomap engine.
//!
//! Two refiners live here:
//! - [`retrieval::LessonIndex`] — an in-process similarity index over
//!   previously confirmed (field-pattern -> concept) lessons, built on
//!   deterministic token-hash embeddings so re-runs reproduce exactly.
//! - [`validation::LlmValidationRefiner`] — an LLM judgment pass over the
//!   low-confidence subset of a batch, speaking a strict JSON protocol
//!   through a provider abstraction (OpenAI/Anthropic/local clients are
//!   feature-gated behind `openai`/`anthropic`/`local`).
//!
//! Both implement the contracts from `ontomap-engine`; the engine treats
//! any error they raise as "no additional signal".

pub mod llm;
pub mod retrieval;
pub mod validation;

pub use retrieval::{LessonIndex, MappingLesson};
pub use validation::LlmValidationRefiner;
