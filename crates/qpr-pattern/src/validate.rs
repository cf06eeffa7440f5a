// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pattern schema validation (spec §4.5 step 2-3).

use std::collections::{HashMap, HashSet};

use qpr_capability::CapabilityRegistry;
use thiserror::Error;

use crate::types::{Pattern, MAX_STEPS_PER_PATTERN};

/// Maximum number of steps allowed to share one `parallel_group` (spec §5).
pub const MAX_PARALLEL_GROUP_WIDTH: usize = 16;

/// A validation failure, always naming the pattern id and the offending
/// field (spec §4.5 step 3).
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// A required field was missing or empty.
    #[error("pattern '{pattern_id}': {field} is required")]
    MissingField {
        /// The invalid pattern's id.
        pattern_id: String,
        /// The field that was missing.
        field: String,
    },
    /// A step referenced a capability not present in the registry.
    #[error("pattern '{pattern_id}': step '{step_name}' references unknown capability '{capability}'")]
    UnknownCapability {
        /// The invalid pattern's id.
        pattern_id: String,
        /// The offending step.
        step_name: String,
        /// The capability that does not resolve.
        capability: String,
    },
    /// Two steps declared the same state key via `name`/`save_as`.
    #[error("pattern '{pattern_id}': duplicate save_as/state key '{state_key}' (steps '{first_step}' and '{second_step}')")]
    DuplicateSaveAs {
        /// The invalid pattern's id.
        pattern_id: String,
        /// The colliding state key.
        state_key: String,
        /// First step to declare the key.
        first_step: String,
        /// Second step to declare the key.
        second_step: String,
    },
    /// A `{{step_name.field}}` reference pointed at a step that does not
    /// appear earlier in declaration order, or at a step in the same
    /// parallel group.
    #[error("pattern '{pattern_id}': step '{step_name}' references '{referenced}' which is not a prior, non-group-sibling step")]
    InvalidStepReference {
        /// The invalid pattern's id.
        pattern_id: String,
        /// The step whose args contain the bad reference.
        step_name: String,
        /// The referenced step name.
        referenced: String,
    },
    /// An output template referenced a state key no step declares.
    #[error("pattern '{pattern_id}': output '{output_name}' references unknown state key '{state_key}'")]
    UnknownOutputReference {
        /// The invalid pattern's id.
        pattern_id: String,
        /// The offending output name.
        output_name: String,
        /// The state key the output's template referenced.
        state_key: String,
    },
    /// The pattern declared more steps than the resource limit allows.
    #[error("pattern '{pattern_id}': {step_count} steps exceeds the maximum of {max}")]
    TooManySteps {
        /// The invalid pattern's id.
        pattern_id: String,
        /// Declared step count.
        step_count: usize,
        /// The enforced ceiling.
        max: usize,
    },
    /// A parallel group exceeded the configured width limit.
    #[error("pattern '{pattern_id}': parallel_group '{group}' has {width} members, exceeding the maximum of {max}")]
    ParallelGroupTooWide {
        /// The invalid pattern's id.
        pattern_id: String,
        /// The oversized group's tag.
        group: String,
        /// Declared member count.
        width: usize,
        /// The enforced ceiling.
        max: usize,
    },
    /// An enum-typed input declared no allowed values.
    #[error("pattern '{pattern_id}': input '{input_name}' is type enum but declares no enum_values")]
    EnumMissingValues {
        /// The invalid pattern's id.
        pattern_id: String,
        /// The offending input.
        input_name: String,
    },
}

/// Validate a parsed [`Pattern`] against the populated capability registry
/// (spec §4.5 step 2). Returns every violation found, not just the first.
pub fn validate(pattern: &Pattern, registry: &CapabilityRegistry) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if pattern.id.trim().is_empty() {
        errors.push(ValidationError::MissingField {
            pattern_id: pattern.id.clone(),
            field: "id".to_string(),
        });
    }
    if pattern.version.trim().is_empty() {
        errors.push(ValidationError::MissingField {
            pattern_id: pattern.id.clone(),
            field: "version".to_string(),
        });
    }

    if pattern.steps.len() > MAX_STEPS_PER_PATTERN {
        errors.push(ValidationError::TooManySteps {
            pattern_id: pattern.id.clone(),
            step_count: pattern.steps.len(),
            max: MAX_STEPS_PER_PATTERN,
        });
    }

    for input in &pattern.inputs {
        if input.input_type == crate::types::InputType::Enum
            && input.enum_values.as_ref().map(|v| v.is_empty()).unwrap_or(true)
        {
            errors.push(ValidationError::EnumMissingValues {
                pattern_id: pattern.id.clone(),
                input_name: input.name.clone(),
            });
        }
    }

    let mut seen_state_keys: HashMap<&str, &str> = HashMap::new();
    let mut declared_so_far: HashSet<&str> = HashSet::new();
    let mut group_of: HashMap<&str, &str> = HashMap::new();
    let mut group_width: HashMap<&str, usize> = HashMap::new();

    for step in &pattern.steps {
        if registry.resolve(&step.capability).is_none() {
            errors.push(ValidationError::UnknownCapability {
                pattern_id: pattern.id.clone(),
                step_name: step.name.clone(),
                capability: step.capability.clone(),
            });
        }

        let state_key = step.state_key();
        if let Some(&first) = seen_state_keys.get(state_key) {
            errors.push(ValidationError::DuplicateSaveAs {
                pattern_id: pattern.id.clone(),
                state_key: state_key.to_string(),
                first_step: first.to_string(),
                second_step: step.name.clone(),
            });
        } else {
            seen_state_keys.insert(state_key, &step.name);
        }

        if let Some(group) = &step.parallel_group {
            group_of.insert(step.name.as_str(), group.as_str());
            *group_width.entry(group.as_str()).or_insert(0) += 1;
        }

        for raw_arg in step.args.values() {
            if let Some(text) = raw_arg.as_str() {
                for reference in qpr_template::scan(text) {
                    let head = reference.path.split('.').next().unwrap_or("");
                    if head == "inputs" || head == "ctx" || head == "state" {
                        continue;
                    }
                    // Bare step-name reference.
                    let same_group = group_of
                        .get(step.name.as_str())
                        .zip(group_of.get(head))
                        .map(|(a, b)| a == b)
                        .unwrap_or(false);
                    if same_group || !declared_so_far.contains(head) {
                        errors.push(ValidationError::InvalidStepReference {
                            pattern_id: pattern.id.clone(),
                            step_name: step.name.clone(),
                            referenced: head.to_string(),
                        });
                    }
                }
            }
        }

        declared_so_far.insert(step.name.as_str());
    }

    for (group, width) in &group_width {
        if *width > MAX_PARALLEL_GROUP_WIDTH {
            errors.push(ValidationError::ParallelGroupTooWide {
                pattern_id: pattern.id.clone(),
                group: group.to_string(),
                width: *width,
                max: MAX_PARALLEL_GROUP_WIDTH,
            });
        }
    }

    let known_state_keys: HashSet<&str> = pattern.steps.iter().map(|s| s.state_key()).collect();
    for (output_name, template) in &pattern.outputs {
        for reference in qpr_template::scan(template) {
            let mut segments = reference.path.split('.');
            let head = segments.next().unwrap_or("");
            if head == "inputs" || head == "ctx" {
                continue;
            }
            let state_key = if head == "state" {
                segments.next().unwrap_or("")
            } else {
                head
            };
            if !state_key.is_empty() && !known_state_keys.contains(state_key) {
                errors.push(ValidationError::UnknownOutputReference {
                    pattern_id: pattern.id.clone(),
                    output_name: output_name.clone(),
                    state_key: state_key.to_string(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
