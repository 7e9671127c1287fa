// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! This module defines the `Error` struct and the `ErrorKind` enum, which are
//! used to represent errors that can occur while building reports, and the
//! `FetchError` type that external data sources report.

use crate::entity::EntityRef;

/// A macro for defining the `ErrorKind` enum, the `Display` implementation for
/// it, and the constructors for the `Error` struct.
macro_rules! ErrorKind {
    ($(
        ($kind:ident, $ctor:ident)
    ),*) => {
        /// The kind of error that occurred.
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub enum ErrorKind {
            $(
                $kind,
            )*
        }

        impl std::fmt::Display for ErrorKind {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        Self::$kind => write!(f, "{}", stringify!($kind)),
                    )*
                }
            }
        }

        /// Constructors for [`Error`].
        impl Error {
            $(
                #[doc = concat!(
                    "Creates a new [`Error`] with the `",
                    stringify!($kind),
                    "` kind and the given description."
                )]
                pub fn $ctor(desc: impl Into<String>) -> crate::Error {
                    Self {
                        kind: ErrorKind::$kind,
                        desc: desc.into(),
                    }
                }
            )*
        }
    };
}

ErrorKind!(
    (CyclicFormula, cyclic_formula),
    (Evaluation, evaluation),
    (Internal, internal),
    (InvalidFormula, invalid_formula),
    (MalformedTableDefinition, malformed_table_definition),
    (UnknownIdentifier, unknown_identifier)
);

/// An error that can occur while evaluating formulas or building a report.
#[derive(Clone, Debug, PartialEq)]
pub struct Error {
    kind: ErrorKind,
    desc: String,
}

impl Error {
    /// Returns the kind of the error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the human readable description of the error.
    pub fn description(&self) -> &str {
        &self.desc
    }

    /// Returns `true` if the error is local to a single cell, and the rest of
    /// the report can still be built.
    pub fn is_cell_local(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::CyclicFormula
                | ErrorKind::Evaluation
                | ErrorKind::InvalidFormula
                | ErrorKind::UnknownIdentifier
        )
    }

    /// Returns a new error of the same kind, with `context` prepended to the
    /// description.
    pub(crate) fn with_context(&self, context: impl std::fmt::Display) -> Self {
        Self {
            kind: self.kind,
            desc: format!("{context}: {}", self.desc),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.desc)
    }
}

impl std::error::Error for Error {}

/// A failure reported by an external hour-record source.
///
/// Fetch failures are recoverable by substitution: the aggregator replaces
/// the failed entity's records with zero-filled defaults, so they never turn
/// into an [`Error`].
#[derive(Clone, Debug, PartialEq)]
pub struct FetchError {
    entity: EntityRef,
    message: String,
}

impl FetchError {
    /// Creates a new [`FetchError`] for the given entity.
    pub fn new(entity: EntityRef, message: impl Into<String>) -> Self {
        Self {
            entity,
            message: message.into(),
        }
    }

    /// Returns the entity whose records could not be fetched.
    pub fn entity(&self) -> EntityRef {
        self.entity
    }

    /// Returns the message reported by the data source.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fetching hours for {} failed: {}", self.entity, self.message)
    }
}

impl std::error::Error for FetchError {}
