// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! This module defines the `SubjectType` and `ObjectType` enums, which
//! represent the market category of subjects and their metering points.

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Represents the category of a market participant.
///
/// The category decides which hour fields are shown for the subject: only
/// generation-capable subjects expose the generation counterparts of the
/// plan and fact fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectType {
    #[default]
    Unspecified,
    Consumer,
    Generator,
    Prosumer,
}

impl Display for SubjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubjectType::Unspecified => write!(f, "Unspecified"),
            SubjectType::Consumer => write!(f, "Consumer"),
            SubjectType::Generator => write!(f, "Generator"),
            SubjectType::Prosumer => write!(f, "Prosumer"),
        }
    }
}

/// Represents the category of a metering point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectType {
    #[default]
    Unspecified,
    Consumption,
    Generation,
    Mixed,
}

impl Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectType::Unspecified => write!(f, "Unspecified"),
            ObjectType::Consumption => write!(f, "Consumption"),
            ObjectType::Generation => write!(f, "Generation"),
            ObjectType::Mixed => write!(f, "Mixed"),
        }
    }
}

/// Predicates for checking the category of an entity.
pub(crate) trait TypePredicates {
    fn is_generation_capable(&self) -> bool;

    fn is_unspecified(&self) -> bool;
}

impl TypePredicates for SubjectType {
    fn is_generation_capable(&self) -> bool {
        matches!(self, SubjectType::Generator | SubjectType::Prosumer)
    }

    fn is_unspecified(&self) -> bool {
        *self == SubjectType::Unspecified
    }
}

impl TypePredicates for ObjectType {
    fn is_generation_capable(&self) -> bool {
        matches!(self, ObjectType::Generation | ObjectType::Mixed)
    }

    fn is_unspecified(&self) -> bool {
        *self == ObjectType::Unspecified
    }
}
