// License: MIT
// Copyright © 2024 Frequenz Energy-as-a-Service GmbH

//! Subjects, objects, and the resolution of row entities into display names.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::{
    entity_type::{ObjectType, SubjectType, TypePredicates},
    records::HourField,
    report::Row,
};

/// The display name used for entities that can't be found.
pub const UNKNOWN_ENTITY: &str = "<unknown>";

/// A market participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub subject_type: SubjectType,
    /// Ids of the metering points that belong to the subject.
    #[serde(default)]
    pub object_ids: Vec<u64>,
}

/// A metering point, owned by a subject.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub object_type: ObjectType,
    pub subject_id: u64,
    /// Ids of other objects this one is cross-referenced with.
    #[serde(default)]
    pub related_ids: Vec<u64>,
}

/// A reference to the entity a row or record belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    Subject(u64),
    Object(u64),
}

impl EntityRef {
    pub fn id(&self) -> u64 {
        match self {
            EntityRef::Subject(id) | EntityRef::Object(id) => *id,
        }
    }

    pub fn is_subject(&self) -> bool {
        matches!(self, EntityRef::Subject(_))
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityRef::Subject(id) => write!(f, "subject #{id}"),
            EntityRef::Object(id) => write!(f, "object #{id}"),
        }
    }
}

/// Returns the display name of `entity`, looked up in the given collections,
/// or [`UNKNOWN_ENTITY`] if it isn't there.
pub fn resolve_name(entity: EntityRef, subjects: &[Subject], objects: &[Object]) -> String {
    let name = match entity {
        EntityRef::Subject(id) => subjects.iter().find(|s| s.id == id).map(|s| &s.name),
        EntityRef::Object(id) => objects.iter().find(|o| o.id == id).map(|o| &o.name),
    };
    name.cloned().unwrap_or_else(|| UNKNOWN_ENTITY.to_string())
}

/// `IndexMap` stores the position of an entity in its collection, so that it
/// can be retrieved from its id.
type IndexMap = HashMap<u64, usize>;

/// An indexed, read-only view of the subjects and objects of a report.
#[derive(Clone, Debug, Default)]
pub struct EntityDirectory {
    subjects: Vec<Subject>,
    objects: Vec<Object>,
    subject_indices: IndexMap,
    object_indices: IndexMap,
}

impl EntityDirectory {
    /// Creates a new directory.  When an id appears more than once, the last
    /// entity with that id wins.
    pub fn new(
        subjects: impl IntoIterator<Item = Subject>,
        objects: impl IntoIterator<Item = Object>,
    ) -> Self {
        let subjects: Vec<Subject> = subjects.into_iter().collect();
        let objects: Vec<Object> = objects.into_iter().collect();

        let mut subject_indices = IndexMap::new();
        for (index, subject) in subjects.iter().enumerate() {
            if subject.subject_type.is_unspecified() {
                tracing::debug!("Subject {} has an unspecified type.", subject.id);
            }
            if subject_indices.insert(subject.id, index).is_some() {
                tracing::warn!("Duplicate subject id {}, keeping the last one.", subject.id);
            }
        }
        let mut object_indices = IndexMap::new();
        for (index, object) in objects.iter().enumerate() {
            if object_indices.insert(object.id, index).is_some() {
                tracing::warn!("Duplicate object id {}, keeping the last one.", object.id);
            }
        }

        Self {
            subjects,
            objects,
            subject_indices,
            object_indices,
        }
    }

    /// Returns the subject with the given id, if it exists.
    pub fn subject(&self, id: u64) -> Option<&Subject> {
        self.subject_indices.get(&id).map(|&i| &self.subjects[i])
    }

    /// Returns the object with the given id, if it exists.
    pub fn object(&self, id: u64) -> Option<&Object> {
        self.object_indices.get(&id).map(|&i| &self.objects[i])
    }

    /// Returns the display name of `entity`, or [`UNKNOWN_ENTITY`].
    pub fn name(&self, entity: EntityRef) -> &str {
        match entity {
            EntityRef::Subject(id) => self.subject(id).map(|s| s.name.as_str()),
            EntityRef::Object(id) => self.object(id).map(|o| o.name.as_str()),
        }
        .unwrap_or(UNKNOWN_ENTITY)
    }

    /// Returns the label of a report row.
    ///
    /// Subject rows are labelled with the subject name.  When the row drills
    /// down into a selection of the subject's objects, the object names are
    /// appended: `"S1 / O1, O2"`.  Object rows are labelled with the object
    /// name.
    pub fn row_label(&self, row: &Row) -> String {
        let name = self.name(row.entity);
        if !row.entity.is_subject() || row.objects.is_empty() {
            return name.to_string();
        }
        let objects = row
            .objects
            .iter()
            .map(|id| self.name(EntityRef::Object(*id)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{name} / {objects}")
    }

    /// Returns the ids of the objects owned by a subject, in ascending order.
    ///
    /// Both the subject's declared `object_ids` and the objects pointing back
    /// at the subject are included.
    pub fn objects_of(&self, subject_id: u64) -> Vec<u64> {
        let mut ids = BTreeSet::new();
        if let Some(subject) = self.subject(subject_id) {
            ids.extend(subject.object_ids.iter().copied());
        }
        ids.extend(
            self.objects
                .iter()
                .filter(|o| o.subject_id == subject_id)
                .map(|o| o.id),
        );
        ids.into_iter().collect()
    }

    /// Returns the subject that owns the given object.
    pub fn owner_of(&self, object_id: u64) -> Option<u64> {
        self.object(object_id).map(|o| o.subject_id).or_else(|| {
            self.subjects
                .iter()
                .find(|s| s.object_ids.contains(&object_id))
                .map(|s| s.id)
        })
    }

    /// Returns `true` if the entity exposes generation fields.  Unknown
    /// entities don't.
    pub fn is_generation_capable(&self, entity: EntityRef) -> bool {
        match entity {
            EntityRef::Subject(id) => self
                .subject(id)
                .is_some_and(|s| s.subject_type.is_generation_capable()),
            EntityRef::Object(id) => self
                .object(id)
                .is_some_and(|o| o.object_type.is_generation_capable()),
        }
    }

    /// Returns the hour fields that are shown for the entity.
    pub fn visible_fields(&self, entity: EntityRef) -> Vec<HourField> {
        let generation = self.is_generation_capable(entity);
        HourField::ALL
            .into_iter()
            .filter(|field| generation || !field.is_generation())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{directory, object, subject};

    #[test]
    fn test_resolve_name() {
        let subjects = vec![subject(1, "S1", SubjectType::Consumer, &[10])];
        let objects = vec![object(10, "O1", ObjectType::Consumption, 1)];

        assert_eq!(resolve_name(EntityRef::Subject(1), &subjects, &objects), "S1");
        assert_eq!(resolve_name(EntityRef::Object(10), &subjects, &objects), "O1");
        assert_eq!(
            resolve_name(EntityRef::Object(1), &subjects, &objects),
            UNKNOWN_ENTITY
        );
        assert_eq!(resolve_name(EntityRef::Subject(9), &[], &[]), UNKNOWN_ENTITY);
    }

    #[test]
    fn test_row_labels() {
        let directory = directory();

        assert_eq!(directory.row_label(&Row::subject(1)), "S1");
        assert_eq!(
            directory.row_label(&Row::subject(1).with_objects([10, 11])),
            "S1 / O1, O2"
        );
        assert_eq!(
            directory.row_label(&Row::subject(1).with_objects([99])),
            "S1 / <unknown>"
        );
        assert_eq!(directory.row_label(&Row::object(11)), "O2");
        assert_eq!(directory.row_label(&Row::subject(42)), UNKNOWN_ENTITY);
    }

    #[test]
    fn test_ownership() {
        let directory = directory();

        assert_eq!(directory.objects_of(1), vec![10, 11]);
        assert_eq!(directory.objects_of(2), vec![20]);
        assert_eq!(directory.objects_of(3), Vec::<u64>::new());
        assert_eq!(directory.owner_of(20), Some(2));
        assert_eq!(directory.owner_of(99), None);
    }

    #[test]
    fn test_visible_fields() {
        let directory = directory();

        assert!(!directory.is_generation_capable(EntityRef::Subject(1)));
        assert!(directory.is_generation_capable(EntityRef::Subject(2)));
        assert!(!directory.is_generation_capable(EntityRef::Subject(42)));

        let consumer = directory.visible_fields(EntityRef::Subject(1));
        assert!(consumer.contains(&HourField::P1));
        assert!(!consumer.contains(&HourField::P1Gen));
        assert_eq!(
            directory.visible_fields(EntityRef::Subject(2)).len(),
            HourField::ALL.len()
        );
    }

    #[test]
    fn test_duplicate_ids() {
        let directory = EntityDirectory::new(
            [
                subject(1, "old", SubjectType::Consumer, &[]),
                subject(1, "new", SubjectType::Consumer, &[]),
            ],
            [],
        );
        assert_eq!(directory.name(EntityRef::Subject(1)), "new");
    }
}
