//! Writes that change the relation graph or record facts.
//!
//! Each operation validates and applies inside one IMMEDIATE transaction, so
//! the write lock is held before any uniqueness check runs.

use crate::error::{CoreError, CoreResult};
use crate::graph::{IdSet, RelationGraph, StoreGraph};
use crate::model::{
    MembershipKind, Role, ABSENCE_HOURS_MAX, ABSENCE_HOURS_MIN, GRADE_MAX, GRADE_MIN,
};
use chrono::{DateTime, NaiveDate, Utc};
use log::info;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use uuid::Uuid;

fn write_tx(conn: &Connection) -> CoreResult<Transaction<'_>> {
    Ok(Transaction::new_unchecked(
        conn,
        TransactionBehavior::Immediate,
    )?)
}

fn require_role(graph: &StoreGraph<'_>, user_id: &str, role: Role) -> CoreResult<()> {
    match graph.role_of(user_id)? {
        Some(r) if r == role => Ok(()),
        Some(r) => Err(CoreError::bad_params(format!(
            "user {} is a {}, expected {}",
            user_id, r, role
        ))),
        None => Err(CoreError::not_found(role.as_str())),
    }
}

fn non_empty(raw: &str, field: &str) -> CoreResult<String> {
    let t = raw.trim();
    if t.is_empty() {
        return Err(CoreError::bad_params(format!("{} must not be empty", field)));
    }
    Ok(t.to_string())
}

pub fn create_user(conn: &Connection, role: Role, first_name: &str, last_name: &str) -> CoreResult<String> {
    let first = non_empty(first_name, "firstName")?;
    let last = non_empty(last_name, "lastName")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, role, first_name, last_name) VALUES(?, ?, ?, ?)",
        (&id, role.as_str(), &first, &last),
    )?;
    info!("created {} {}", role, id);
    Ok(id)
}

pub fn create_subject(conn: &Connection, name: &str) -> CoreResult<String> {
    let name = non_empty(name, "name")?;
    let tx = write_tx(conn)?;
    let taken = tx
        .query_row("SELECT 1 FROM subjects WHERE name = ?", [&name], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if taken {
        return Err(CoreError::Conflict(format!("subject {} already exists", name)));
    }
    let id = Uuid::new_v4().to_string();
    tx.execute("INSERT INTO subjects(id, name) VALUES(?, ?)", (&id, &name))?;
    tx.commit()?;
    Ok(id)
}

/// Creates a course together with its first teacher.
pub fn create_course(
    conn: &Connection,
    name: &str,
    subject_id: &str,
    teacher_id: &str,
) -> CoreResult<String> {
    let name = non_empty(name, "name")?;
    let tx = write_tx(conn)?;
    let subject = tx
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?;
    if subject.is_none() {
        return Err(CoreError::not_found("subject"));
    }
    require_role(&StoreGraph::new(&tx), teacher_id, Role::Teacher)?;

    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO courses(id, name, subject_id) VALUES(?, ?, ?)",
        (&id, &name, subject_id),
    )?;
    tx.execute(
        "INSERT INTO course_members(course_id, user_id, kind, joined_at) VALUES(?, ?, ?, ?)",
        (&id, teacher_id, MembershipKind::Teacher.as_str(), Utc::now()),
    )?;
    tx.commit()?;
    info!("created course {} taught by {}", id, teacher_id);
    Ok(id)
}

/// Returns false when the user already held this membership.
pub fn add_course_member(
    conn: &Connection,
    course_id: &str,
    user_id: &str,
    kind: MembershipKind,
) -> CoreResult<bool> {
    let tx = write_tx(conn)?;
    let graph = StoreGraph::new(&tx);
    if !graph.course_exists(course_id)? {
        return Err(CoreError::not_found("course"));
    }
    let role = match kind {
        MembershipKind::Teacher => Role::Teacher,
        MembershipKind::Student => Role::Student,
    };
    require_role(&graph, user_id, role)?;

    let existing: Option<String> = tx
        .query_row(
            "SELECT kind FROM course_members WHERE course_id = ? AND user_id = ?",
            (course_id, user_id),
            |r| r.get(0),
        )
        .optional()?;
    match existing.as_deref() {
        Some(k) if k == kind.as_str() => return Ok(false),
        Some(k) => {
            return Err(CoreError::Conflict(format!(
                "user is already a {} of this course",
                k
            )))
        }
        None => {}
    }
    tx.execute(
        "INSERT INTO course_members(course_id, user_id, kind, joined_at) VALUES(?, ?, ?, ?)",
        (course_id, user_id, kind.as_str(), Utc::now()),
    )?;
    tx.commit()?;
    info!("added {} {} to course {}", kind.as_str(), user_id, course_id);
    Ok(true)
}

/// Rejects removing the only teacher of a course.
pub fn remove_course_teacher(conn: &Connection, course_id: &str, teacher_id: &str) -> CoreResult<()> {
    let tx = write_tx(conn)?;
    let graph = StoreGraph::new(&tx);
    if !graph.course_exists(course_id)? {
        return Err(CoreError::not_found("course"));
    }
    let teachers = graph.teachers_of(course_id)?;
    if !teachers.contains(teacher_id) {
        return Err(CoreError::not_found("course teacher"));
    }
    if teachers.len() == 1 {
        return Err(CoreError::Conflict(
            "cannot remove the last teacher of a course".to_string(),
        ));
    }
    tx.execute(
        "DELETE FROM course_members WHERE course_id = ? AND user_id = ? AND kind = 'teacher'",
        (course_id, teacher_id),
    )?;
    tx.commit()?;
    info!("removed teacher {} from course {}", teacher_id, course_id);
    Ok(())
}

pub fn remove_course_student(conn: &Connection, course_id: &str, student_id: &str) -> CoreResult<()> {
    let tx = write_tx(conn)?;
    let graph = StoreGraph::new(&tx);
    if !graph.course_exists(course_id)? {
        return Err(CoreError::not_found("course"));
    }
    let removed = tx.execute(
        "DELETE FROM course_members WHERE course_id = ? AND user_id = ? AND kind = 'student'",
        (course_id, student_id),
    )?;
    if removed == 0 {
        return Err(CoreError::not_found("course student"));
    }
    tx.commit()?;
    Ok(())
}

pub fn create_group(conn: &Connection, name: &str) -> CoreResult<String> {
    let name = non_empty(name, "name")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO student_groups(id, name, curator_id) VALUES(?, ?, NULL)",
        (&id, &name),
    )?;
    info!("created group {}", id);
    Ok(id)
}

/// One curator per group, one group per teacher.
pub fn assign_curator(conn: &Connection, group_id: &str, teacher_id: &str) -> CoreResult<()> {
    let tx = write_tx(conn)?;
    let graph = StoreGraph::new(&tx);
    let current: Option<Option<String>> = tx
        .query_row(
            "SELECT curator_id FROM student_groups WHERE id = ?",
            [group_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(current) = current else {
        return Err(CoreError::not_found("group"));
    };
    require_role(&graph, teacher_id, Role::Teacher)?;

    match current.as_deref() {
        Some(c) if c == teacher_id => return Ok(()),
        Some(_) => {
            return Err(CoreError::Conflict(
                "group already has a curator".to_string(),
            ))
        }
        None => {}
    }
    if let Some(other) = graph.group_curated_by(teacher_id)? {
        return Err(CoreError::Conflict(format!(
            "teacher already curates group {}",
            other
        )));
    }
    tx.execute(
        "UPDATE student_groups SET curator_id = ? WHERE id = ?",
        (teacher_id, group_id),
    )?;
    tx.commit()?;
    info!("assigned curator {} to group {}", teacher_id, group_id);
    Ok(())
}

pub fn unassign_curator(conn: &Connection, group_id: &str) -> CoreResult<Option<String>> {
    let tx = write_tx(conn)?;
    let current: Option<Option<String>> = tx
        .query_row(
            "SELECT curator_id FROM student_groups WHERE id = ?",
            [group_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(current) = current else {
        return Err(CoreError::not_found("group"));
    };
    tx.execute(
        "UPDATE student_groups SET curator_id = NULL WHERE id = ?",
        [group_id],
    )?;
    tx.commit()?;
    Ok(current)
}

/// Places the student in the group, moving them out of any previous one.
/// Returns the previous group, if any.
pub fn add_student_to_group(conn: &Connection, group_id: &str, student_id: &str) -> CoreResult<Option<String>> {
    let tx = write_tx(conn)?;
    let graph = StoreGraph::new(&tx);
    if !graph.group_exists(group_id)? {
        return Err(CoreError::not_found("group"));
    }
    require_role(&graph, student_id, Role::Student)?;
    let previous = graph.group_of(student_id)?;
    tx.execute(
        "INSERT INTO group_members(student_id, group_id) VALUES(?, ?)
         ON CONFLICT(student_id) DO UPDATE SET group_id = excluded.group_id",
        (student_id, group_id),
    )?;
    tx.commit()?;
    info!("placed student {} in group {}", student_id, group_id);
    Ok(previous.filter(|p| p != group_id))
}

pub fn remove_student_from_group(conn: &Connection, student_id: &str) -> CoreResult<String> {
    let tx = write_tx(conn)?;
    let Some(group_id) = StoreGraph::new(&tx).group_of(student_id)? else {
        return Err(CoreError::not_found("group membership"));
    };
    tx.execute("DELETE FROM group_members WHERE student_id = ?", [student_id])?;
    tx.commit()?;
    Ok(group_id)
}

/// Links a parent to a child and returns the child's parents afterwards.
pub fn link_parent(conn: &Connection, parent_id: &str, child_id: &str) -> CoreResult<IdSet> {
    let tx = write_tx(conn)?;
    let graph = StoreGraph::new(&tx);
    require_role(&graph, parent_id, Role::Parent)?;
    require_role(&graph, child_id, Role::Student)?;
    tx.execute(
        "INSERT OR IGNORE INTO parent_children(parent_id, child_id) VALUES(?, ?)",
        (parent_id, child_id),
    )?;
    let parents = graph.parents_of(child_id)?;
    tx.commit()?;
    info!("linked parent {} to child {}", parent_id, child_id);
    Ok(parents)
}

pub fn unlink_parent(conn: &Connection, parent_id: &str, child_id: &str) -> CoreResult<()> {
    let removed = conn.execute(
        "DELETE FROM parent_children WHERE parent_id = ? AND child_id = ?",
        (parent_id, child_id),
    )?;
    if removed == 0 {
        return Err(CoreError::not_found("parent link"));
    }
    Ok(())
}

pub fn create_assignment(conn: &Connection, course_id: &str, title: &str) -> CoreResult<String> {
    let title = non_empty(title, "title")?;
    if !StoreGraph::new(conn).course_exists(course_id)? {
        return Err(CoreError::not_found("course"));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO assignments(id, course_id, title) VALUES(?, ?, ?)",
        (&id, course_id, &title),
    )?;
    Ok(id)
}

pub fn assignment_course(conn: &Connection, assignment_id: &str) -> CoreResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT course_id FROM assignments WHERE id = ?",
            [assignment_id],
            |r| r.get(0),
        )
        .optional()?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedGrade {
    pub grade_id: String,
    pub replaced: bool,
}

/// One grade per (assignment, student); re-grading replaces the earlier row.
pub fn record_grade(
    conn: &Connection,
    assignment_id: &str,
    student_id: &str,
    instructor_id: &str,
    value: i64,
    graded_at: DateTime<Utc>,
) -> CoreResult<RecordedGrade> {
    if !(GRADE_MIN..=GRADE_MAX).contains(&value) {
        return Err(CoreError::bad_params(format!(
            "value must be between {} and {}",
            GRADE_MIN, GRADE_MAX
        )));
    }
    let tx = write_tx(conn)?;
    let Some(course_id) = assignment_course(&tx, assignment_id)? else {
        return Err(CoreError::not_found("assignment"));
    };
    let graph = StoreGraph::new(&tx);
    require_role(&graph, student_id, Role::Student)?;
    if !graph.students_of(&course_id)?.contains(student_id) {
        return Err(CoreError::bad_params(
            "student is not enrolled in the assignment's course",
        ));
    }

    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM grades WHERE assignment_id = ? AND student_id = ?",
            (assignment_id, student_id),
            |r| r.get(0),
        )
        .optional()?;
    let out = match existing {
        Some(grade_id) => {
            tx.execute(
                "UPDATE grades SET value = ?, graded_at = ?, instructor_id = ? WHERE id = ?",
                (value, graded_at, instructor_id, &grade_id),
            )?;
            RecordedGrade {
                grade_id,
                replaced: true,
            }
        }
        None => {
            let grade_id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO grades(id, assignment_id, student_id, instructor_id, value, graded_at)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (&grade_id, assignment_id, student_id, instructor_id, value, graded_at),
            )?;
            RecordedGrade {
                grade_id,
                replaced: false,
            }
        }
    };
    tx.commit()?;
    info!(
        "graded student {} on assignment {} (replaced={})",
        student_id, assignment_id, out.replaced
    );
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct NewAbsence<'a> {
    pub student_id: &'a str,
    pub instructor_id: &'a str,
    pub date: NaiveDate,
    pub hours: i64,
    pub is_excused: bool,
    pub reason: Option<&'a str>,
    pub comment: Option<&'a str>,
}

pub fn validate_hours(hours: i64) -> CoreResult<()> {
    if !(ABSENCE_HOURS_MIN..=ABSENCE_HOURS_MAX).contains(&hours) {
        return Err(CoreError::bad_params(format!(
            "hours must be between {} and {}",
            ABSENCE_HOURS_MIN, ABSENCE_HOURS_MAX
        )));
    }
    Ok(())
}

/// Records an absence against the student's current group.
pub fn record_absence(conn: &Connection, absence: &NewAbsence<'_>) -> CoreResult<String> {
    validate_hours(absence.hours)?;
    let tx = write_tx(conn)?;
    let graph = StoreGraph::new(&tx);
    require_role(&graph, absence.student_id, Role::Student)?;
    let Some(group_id) = graph.group_of(absence.student_id)? else {
        return Err(CoreError::bad_params("student is not in a group"));
    };
    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO absences(id, student_id, group_id, instructor_id, date, hours, is_excused, reason, comment)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            absence.student_id,
            &group_id,
            absence.instructor_id,
            absence.date,
            absence.hours,
            absence.is_excused as i64,
            absence.reason,
            absence.comment,
        ),
    )?;
    tx.commit()?;
    info!(
        "recorded {}h absence for student {}",
        absence.hours, absence.student_id
    );
    Ok(id)
}

pub fn absence_student(conn: &Connection, absence_id: &str) -> CoreResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT student_id FROM absences WHERE id = ?",
            [absence_id],
            |r| r.get(0),
        )
        .optional()?)
}

pub fn set_absence_excused(
    conn: &Connection,
    absence_id: &str,
    is_excused: bool,
    reason: Option<&str>,
) -> CoreResult<()> {
    let updated = conn.execute(
        "UPDATE absences SET is_excused = ?, reason = COALESCE(?, reason) WHERE id = ?",
        (is_excused as i64, reason, absence_id),
    )?;
    if updated == 0 {
        return Err(CoreError::not_found("absence"));
    }
    Ok(())
}

pub fn delete_absence(conn: &Connection, absence_id: &str) -> CoreResult<()> {
    let removed = conn.execute("DELETE FROM absences WHERE id = ?", [absence_id])?;
    if removed == 0 {
        return Err(CoreError::not_found("absence"));
    }
    Ok(())
}
