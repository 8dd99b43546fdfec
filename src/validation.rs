//! Instruction validation before anything is launched.

use crate::util::{redact_text, truncate_chars};

/// Characters of a rejected instruction kept in the audit log.
const LOG_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid { reason: String },
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }
}

#[derive(Debug, Clone)]
pub struct InstructionValidator {
    max_chars: usize,
}

impl InstructionValidator {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Check an instruction. `None` means the field was missing or not a string.
    pub fn validate(&self, instruction: Option<&str>) -> Validation {
        let result = self.check(instruction);
        if let Validation::Invalid { reason } = &result {
            let raw = instruction.unwrap_or_default();
            tracing::warn!(
                length = raw.chars().count(),
                reason = %reason,
                preview = %redact_text(&truncate_chars(raw, LOG_PREVIEW_CHARS)),
                "Instruction rejected"
            );
        }
        result
    }

    fn check(&self, instruction: Option<&str>) -> Validation {
        let instruction = match instruction {
            Some(s) if !s.is_empty() => s,
            _ => {
                return Validation::Invalid {
                    reason: "Instruction is required and must be a string".to_string(),
                }
            }
        };

        if instruction.chars().count() > self.max_chars {
            return Validation::Invalid {
                reason: format!(
                    "Instruction is too long. Maximum length is {} characters.",
                    self.max_chars
                ),
            };
        }

        if instruction.trim().is_empty() {
            return Validation::Invalid {
                reason: "Instruction cannot be empty".to_string(),
            };
        }

        Validation::Valid
    }

    /// Truncate to the maximum length, then trim surrounding whitespace.
    pub fn sanitize(&self, instruction: &str) -> String {
        truncate_chars(instruction, self.max_chars).trim().to_string()
    }
}

impl Default for InstructionValidator {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_INSTRUCTION_LENGTH)
    }
}
