//! Visibility rules: who may see which student, group or course.
//!
//! One resolver dispatches on the closed `Role` set. Existence of the target
//! is always checked before any rule runs, so a missing target reports
//! `NotFound` for every role and an existing-but-invisible one `Forbidden`.

use crate::error::{CoreError, CoreResult};
use crate::graph::{IdSet, RelationGraph};
use crate::model::{Actor, Role};
use serde::Serialize;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Student,
    Group,
    Course,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Student => "student",
            TargetKind::Group => "group",
            TargetKind::Course => "course",
        }
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(TargetKind::Student),
            "group" => Ok(TargetKind::Group),
            "course" => Ok(TargetKind::Course),
            other => Err(format!("unknown targetKind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Access {
    Allow,
    Forbidden,
    NotFound,
}

/// Optional narrowing applied on top of an actor's scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFilter {
    pub group_id: Option<String>,
    pub course_id: Option<String>,
}

pub struct VisibilityResolver<'g, G: RelationGraph + ?Sized> {
    graph: &'g G,
}

impl<'g, G: RelationGraph + ?Sized> VisibilityResolver<'g, G> {
    pub fn new(graph: &'g G) -> Self {
        Self { graph }
    }

    pub fn resolve_access(
        &self,
        actor: &Actor,
        kind: TargetKind,
        target_id: &str,
    ) -> CoreResult<Access> {
        if !self.target_exists(kind, target_id)? {
            return Ok(Access::NotFound);
        }
        let allowed = match kind {
            TargetKind::Student => self.can_see_student(actor, target_id)?,
            TargetKind::Group => self.can_see_group(actor, target_id)?,
            TargetKind::Course => self.can_see_course(actor, target_id)?,
        };
        Ok(if allowed {
            Access::Allow
        } else {
            Access::Forbidden
        })
    }

    /// Like `resolve_access`, but turns a denial into the matching error.
    pub fn require(&self, actor: &Actor, kind: TargetKind, target_id: &str) -> CoreResult<()> {
        match self.resolve_access(actor, kind, target_id)? {
            Access::Allow => Ok(()),
            Access::NotFound => Err(CoreError::not_found(kind.as_str())),
            Access::Forbidden => Err(CoreError::Forbidden(format!(
                "{} may not access this {}",
                actor.role,
                kind.as_str()
            ))),
        }
    }

    fn target_exists(&self, kind: TargetKind, target_id: &str) -> CoreResult<bool> {
        match kind {
            TargetKind::Student => {
                Ok(self.graph.role_of(target_id)? == Some(Role::Student))
            }
            TargetKind::Group => self.graph.group_exists(target_id),
            TargetKind::Course => self.graph.course_exists(target_id),
        }
    }

    fn can_see_student(&self, actor: &Actor, student_id: &str) -> CoreResult<bool> {
        match actor.role {
            Role::Administrator => Ok(true),
            Role::Teacher => {
                if self.curates_group_of(&actor.id, student_id)? {
                    return Ok(true);
                }
                self.graph.is_teaching_student(&actor.id, student_id)
            }
            Role::Student => Ok(actor.id == student_id),
            Role::Parent => Ok(self.graph.children_of(&actor.id)?.contains(student_id)),
        }
    }

    fn can_see_group(&self, actor: &Actor, group_id: &str) -> CoreResult<bool> {
        match actor.role {
            Role::Administrator => Ok(true),
            Role::Teacher => {
                Ok(self.graph.group_curated_by(&actor.id)?.as_deref() == Some(group_id))
            }
            Role::Student => Ok(self.graph.group_of(&actor.id)?.as_deref() == Some(group_id)),
            Role::Parent => Ok(false),
        }
    }

    fn can_see_course(&self, actor: &Actor, course_id: &str) -> CoreResult<bool> {
        match actor.role {
            Role::Administrator => Ok(true),
            Role::Teacher => Ok(self.graph.teachers_of(course_id)?.contains(&actor.id)),
            Role::Student => Ok(self
                .graph
                .courses_attended_by(&actor.id)?
                .contains(course_id)),
            Role::Parent => Ok(false),
        }
    }

    fn curates_group_of(&self, teacher_id: &str, student_id: &str) -> CoreResult<bool> {
        let Some(curated) = self.graph.group_curated_by(teacher_id)? else {
            return Ok(false);
        };
        Ok(self.graph.group_of(student_id)?.as_deref() == Some(curated.as_str()))
    }

    /// Students the actor may see, before any narrowing.
    pub fn base_scope(&self, actor: &Actor) -> CoreResult<IdSet> {
        match actor.role {
            Role::Administrator => self.graph.all_students(),
            Role::Teacher => {
                let mut scope = self.graph.students_taught_by(&actor.id)?;
                if let Some(group_id) = self.graph.group_curated_by(&actor.id)? {
                    scope.extend(self.graph.members_of(&group_id)?);
                }
                Ok(scope)
            }
            Role::Student => {
                let mut scope = IdSet::new();
                if self.graph.role_of(&actor.id)? == Some(Role::Student) {
                    scope.insert(actor.id.clone());
                }
                Ok(scope)
            }
            Role::Parent => self.graph.children_of(&actor.id),
        }
    }

    /// Scope set for list-style queries. Filters only ever shrink the set.
    pub fn resolve_scope(&self, actor: &Actor, filter: &ScopeFilter) -> CoreResult<IdSet> {
        if let Some(group_id) = filter.group_id.as_deref() {
            if !self.graph.group_exists(group_id)? {
                return Err(CoreError::not_found("group"));
            }
        }
        if let Some(course_id) = filter.course_id.as_deref() {
            if !self.graph.course_exists(course_id)? {
                return Err(CoreError::not_found("course"));
            }
        }

        let mut scope = self.base_scope(actor)?;
        if let Some(group_id) = filter.group_id.as_deref() {
            let members = self.graph.members_of(group_id)?;
            scope.retain(|s| members.contains(s));
        }
        if let Some(course_id) = filter.course_id.as_deref() {
            let students = self.graph.students_of(course_id)?;
            scope.retain(|s| students.contains(s));
        }
        Ok(scope)
    }
}
