use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Field-keyed validation messages, shown inline next to each form field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn extend(&mut self, field: &str, messages: Vec<String>) {
        for message in messages {
            self.add(field, message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn into_result(self) -> Result<(), StageError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(StageError::Validation(self))
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.0 {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{field}: {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Why a staging call staged nothing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StageError {
    #[error("validation failed: {0}")]
    Validation(FieldErrors),

    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("the root queue cannot be deleted")]
    RootNotDeletable,
}

impl StageError {
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            Self::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("an apply is already in flight")]
    InFlight,

    #[error("there are no staged changes to apply")]
    NothingStaged,

    #[error("configuration update rejected: {0}")]
    Rejected(String),

    #[error("configuration update failed: {0}")]
    Transport(String),
}

pub type StageResult<T> = Result<T, StageError>;
