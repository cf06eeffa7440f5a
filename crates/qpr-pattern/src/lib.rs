// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pattern Loader & Validator (C6, spec §4.5): parses pattern documents,
//! validates them against the Capability Registry, and builds the `by_id`
//! and intent-routing indexes the rest of the runtime consults.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod store;
mod types;
mod validate;

pub use store::{LoadError, LoadedPattern, PatternStore};
pub use types::{DisplayHints, InputSpec, InputType, Pattern, Step, MAX_STEPS_PER_PATTERN};
pub use validate::{validate, ValidationError, MAX_PARALLEL_GROUP_WIDTH};
