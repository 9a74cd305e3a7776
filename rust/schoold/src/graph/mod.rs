//! Read-only view over the relations that drive visibility:
//! course membership, group curation/membership and parent/child links.
//!
//! Implementations carry no policy. Callers that need a consistent view for
//! one logical request build the graph over a single read transaction.

#[cfg(test)]
mod memory;
mod store;

#[cfg(test)]
pub use memory::MemoryGraph;
pub use store::StoreGraph;

use crate::error::CoreResult;
use crate::model::Role;
use std::collections::BTreeSet;

pub type IdSet = BTreeSet<String>;

pub trait RelationGraph {
    fn role_of(&self, user_id: &str) -> CoreResult<Option<Role>>;
    fn group_exists(&self, group_id: &str) -> CoreResult<bool>;
    fn course_exists(&self, course_id: &str) -> CoreResult<bool>;

    fn courses_taught_by(&self, user_id: &str) -> CoreResult<IdSet>;
    fn courses_attended_by(&self, user_id: &str) -> CoreResult<IdSet>;
    fn teachers_of(&self, course_id: &str) -> CoreResult<IdSet>;
    fn students_of(&self, course_id: &str) -> CoreResult<IdSet>;

    fn group_curated_by(&self, user_id: &str) -> CoreResult<Option<String>>;
    fn group_of(&self, student_id: &str) -> CoreResult<Option<String>>;
    fn members_of(&self, group_id: &str) -> CoreResult<IdSet>;

    fn children_of(&self, parent_id: &str) -> CoreResult<IdSet>;
    fn parents_of(&self, student_id: &str) -> CoreResult<IdSet>;

    fn all_students(&self) -> CoreResult<IdSet>;

    fn is_teaching_student(&self, teacher_id: &str, student_id: &str) -> CoreResult<bool> {
        for course_id in self.courses_taught_by(teacher_id)? {
            if self.students_of(&course_id)?.contains(student_id) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Students enrolled in any course the teacher teaches.
    fn students_taught_by(&self, teacher_id: &str) -> CoreResult<IdSet> {
        let mut out = IdSet::new();
        for course_id in self.courses_taught_by(teacher_id)? {
            out.extend(self.students_of(&course_id)?);
        }
        Ok(out)
    }
}
