use crate::access::{Access, TargetKind, VisibilityResolver};
use crate::error::{CoreError, CoreResult};
use crate::facts::parse_day;
use crate::graph::{RelationGraph, StoreGraph};
use crate::ipc::error::respond;
use crate::ipc::helpers::{
    db_conn, opt_str, parse_actor, require_admin, required_bool, required_i64, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Actor, MembershipKind, Role};
use crate::roster::{self, NewAbsence};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::json;

/// Target existence is reported first for every role; then only administrators
/// and teachers who can see the target may record against it.
fn require_recorder_access(
    conn: &Connection,
    actor: &Actor,
    kind: TargetKind,
    target_id: &str,
) -> CoreResult<()> {
    let graph = StoreGraph::new(conn);
    let access = VisibilityResolver::new(&graph).resolve_access(actor, kind, target_id)?;
    match (actor.role, access) {
        (_, Access::NotFound) => Err(CoreError::not_found(kind.as_str())),
        (Role::Administrator, _) | (Role::Teacher, Access::Allow) => Ok(()),
        (role, _) => Err(CoreError::Forbidden(format!(
            "{} may not record grades or absences for this {}",
            role,
            kind.as_str()
        ))),
    }
}

/// Teachers record under their own id. Administrators name the instructor,
/// who must be a teacher (of `course_id`, when the fact belongs to a course).
fn resolve_instructor(
    conn: &Connection,
    actor: &Actor,
    p: &serde_json::Value,
    course_id: Option<&str>,
) -> CoreResult<String> {
    let requested = opt_str(p, "instructorId");
    if actor.role != Role::Administrator {
        if requested.is_some_and(|id| id != actor.id) {
            return Err(CoreError::Forbidden(
                "teachers record under their own id".to_string(),
            ));
        }
        return Ok(actor.id.clone());
    }

    let instructor_id = required_str(p, "instructorId")?;
    let graph = StoreGraph::new(conn);
    match graph.role_of(instructor_id)? {
        None => return Err(CoreError::not_found("instructor")),
        Some(Role::Teacher) => {}
        Some(other) => {
            return Err(CoreError::bad_params(format!(
                "instructor must be a teacher, not a {}",
                other
            )))
        }
    }
    if let Some(course_id) = course_id {
        if !graph.teachers_of(course_id)?.contains(instructor_id) {
            return Err(CoreError::bad_params("instructor does not teach this course"));
        }
    }
    Ok(instructor_id.to_string())
}

fn users_create(conn: &Connection, p: &serde_json::Value) -> CoreResult<serde_json::Value> {
    require_admin(&parse_actor(p)?)?;
    let role = required_str(p, "role")?
        .parse::<Role>()
        .map_err(CoreError::bad_params)?;
    let id = roster::create_user(
        conn,
        role,
        required_str(p, "firstName")?,
        required_str(p, "lastName")?,
    )?;
    Ok(json!({ "userId": id, "role": role }))
}

fn subjects_create(conn: &Connection, p: &serde_json::Value) -> CoreResult<serde_json::Value> {
    require_admin(&parse_actor(p)?)?;
    let id = roster::create_subject(conn, required_str(p, "name")?)?;
    Ok(json!({ "subjectId": id }))
}

fn courses_create(conn: &Connection, p: &serde_json::Value) -> CoreResult<serde_json::Value> {
    require_admin(&parse_actor(p)?)?;
    let id = roster::create_course(
        conn,
        required_str(p, "name")?,
        required_str(p, "subjectId")?,
        required_str(p, "teacherId")?,
    )?;
    Ok(json!({ "courseId": id }))
}

fn courses_add_member(conn: &Connection, p: &serde_json::Value) -> CoreResult<serde_json::Value> {
    require_admin(&parse_actor(p)?)?;
    let kind = required_str(p, "kind")?
        .parse::<MembershipKind>()
        .map_err(CoreError::bad_params)?;
    let added = roster::add_course_member(
        conn,
        required_str(p, "courseId")?,
        required_str(p, "userId")?,
        kind,
    )?;
    Ok(json!({ "added": added }))
}

fn courses_remove_teacher(conn: &Connection, p: &serde_json::Value) -> CoreResult<serde_json::Value> {
    require_admin(&parse_actor(p)?)?;
    roster::remove_course_teacher(
        conn,
        required_str(p, "courseId")?,
        required_str(p, "teacherId")?,
    )?;
    Ok(json!({ "removed": true }))
}

fn courses_remove_student(conn: &Connection, p: &serde_json::Value) -> CoreResult<serde_json::Value> {
    require_admin(&parse_actor(p)?)?;
    roster::remove_course_student(
        conn,
        required_str(p, "courseId")?,
        required_str(p, "studentId")?,
    )?;
    Ok(json!({ "removed": true }))
}

fn groups_create(conn: &Connection, p: &serde_json::Value) -> CoreResult<serde_json::Value> {
    require_admin(&parse_actor(p)?)?;
    let id = roster::create_group(conn, required_str(p, "name")?)?;
    Ok(json!({ "groupId": id }))
}

fn groups_assign_curator(conn: &Connection, p: &serde_json::Value) -> CoreResult<serde_json::Value> {
    require_admin(&parse_actor(p)?)?;
    let group_id = required_str(p, "groupId")?;
    let teacher_id = required_str(p, "teacherId")?;
    roster::assign_curator(conn, group_id, teacher_id)?;
    Ok(json!({ "groupId": group_id, "curatorId": teacher_id }))
}

fn groups_unassign_curator(conn: &Connection, p: &serde_json::Value) -> CoreResult<serde_json::Value> {
    require_admin(&parse_actor(p)?)?;
    let previous = roster::unassign_curator(conn, required_str(p, "groupId")?)?;
    Ok(json!({ "previousCuratorId": previous }))
}

fn groups_add_student(conn: &Connection, p: &serde_json::Value) -> CoreResult<serde_json::Value> {
    require_admin(&parse_actor(p)?)?;
    let previous = roster::add_student_to_group(
        conn,
        required_str(p, "groupId")?,
        required_str(p, "studentId")?,
    )?;
    Ok(json!({ "previousGroupId": previous }))
}

fn groups_remove_student(conn: &Connection, p: &serde_json::Value) -> CoreResult<serde_json::Value> {
    require_admin(&parse_actor(p)?)?;
    let group_id = roster::remove_student_from_group(conn, required_str(p, "studentId")?)?;
    Ok(json!({ "groupId": group_id }))
}

fn family_link(conn: &Connection, p: &serde_json::Value) -> CoreResult<serde_json::Value> {
    require_admin(&parse_actor(p)?)?;
    let parents = roster::link_parent(
        conn,
        required_str(p, "parentId")?,
        required_str(p, "childId")?,
    )?;
    Ok(json!({ "parentIds": parents }))
}

fn family_unlink(conn: &Connection, p: &serde_json::Value) -> CoreResult<serde_json::Value> {
    require_admin(&parse_actor(p)?)?;
    roster::unlink_parent(
        conn,
        required_str(p, "parentId")?,
        required_str(p, "childId")?,
    )?;
    Ok(json!({ "removed": true }))
}

fn assignments_create(conn: &Connection, p: &serde_json::Value) -> CoreResult<serde_json::Value> {
    let actor = parse_actor(p)?;
    let course_id = required_str(p, "courseId")?;
    require_recorder_access(conn, &actor, TargetKind::Course, course_id)?;
    let id = roster::create_assignment(conn, course_id, required_str(p, "title")?)?;
    Ok(json!({ "assignmentId": id }))
}

fn grades_record(conn: &Connection, p: &serde_json::Value) -> CoreResult<serde_json::Value> {
    let actor = parse_actor(p)?;
    let assignment_id = required_str(p, "assignmentId")?;
    let student_id = required_str(p, "studentId")?;
    let value = required_i64(p, "value")?;
    let graded_at = match opt_str(p, "gradedAt") {
        None => Utc::now(),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map_err(|_| CoreError::bad_params("gradedAt must be an RFC 3339 timestamp"))?
            .with_timezone(&Utc),
    };

    let Some(course_id) = roster::assignment_course(conn, assignment_id)? else {
        return Err(CoreError::not_found("assignment"));
    };
    require_recorder_access(conn, &actor, TargetKind::Course, &course_id)?;
    let instructor_id = resolve_instructor(conn, &actor, p, Some(&course_id))?;
    let recorded =
        roster::record_grade(conn, assignment_id, student_id, &instructor_id, value, graded_at)?;
    Ok(json!({
        "gradeId": recorded.grade_id,
        "replaced": recorded.replaced,
    }))
}

fn absences_record(conn: &Connection, p: &serde_json::Value) -> CoreResult<serde_json::Value> {
    let actor = parse_actor(p)?;
    let student_id = required_str(p, "studentId")?;
    let date = parse_day(required_str(p, "date")?)
        .ok_or_else(|| CoreError::bad_params("date must be YYYY-MM-DD"))?;
    let hours = required_i64(p, "hours")?;
    let is_excused = required_bool(p, "isExcused")?;
    require_recorder_access(conn, &actor, TargetKind::Student, student_id)?;
    let instructor_id = resolve_instructor(conn, &actor, p, None)?;

    let id = roster::record_absence(
        conn,
        &NewAbsence {
            student_id,
            instructor_id: &instructor_id,
            date,
            hours,
            is_excused,
            reason: opt_str(p, "reason"),
            comment: opt_str(p, "comment"),
        },
    )?;
    Ok(json!({ "absenceId": id }))
}

fn require_absence_access(conn: &Connection, actor: &Actor, absence_id: &str) -> CoreResult<()> {
    let Some(student_id) = roster::absence_student(conn, absence_id)? else {
        return Err(CoreError::not_found("absence"));
    };
    require_recorder_access(conn, actor, TargetKind::Student, &student_id)
}

fn absences_set_excused(conn: &Connection, p: &serde_json::Value) -> CoreResult<serde_json::Value> {
    let actor = parse_actor(p)?;
    let absence_id = required_str(p, "absenceId")?;
    let is_excused = required_bool(p, "isExcused")?;
    require_absence_access(conn, &actor, absence_id)?;
    roster::set_absence_excused(conn, absence_id, is_excused, opt_str(p, "reason"))?;
    Ok(json!({ "absenceId": absence_id, "isExcused": is_excused }))
}

fn absences_delete(conn: &Connection, p: &serde_json::Value) -> CoreResult<serde_json::Value> {
    let actor = parse_actor(p)?;
    let absence_id = required_str(p, "absenceId")?;
    require_absence_access(conn, &actor, absence_id)?;
    roster::delete_absence(conn, absence_id)?;
    Ok(json!({ "deleted": true }))
}

type RosterFn = fn(&Connection, &serde_json::Value) -> CoreResult<serde_json::Value>;

fn route(method: &str) -> Option<RosterFn> {
    let f: RosterFn = match method {
        "users.create" => users_create,
        "subjects.create" => subjects_create,
        "courses.create" => courses_create,
        "courses.addMember" => courses_add_member,
        "courses.removeTeacher" => courses_remove_teacher,
        "courses.removeStudent" => courses_remove_student,
        "groups.create" => groups_create,
        "groups.assignCurator" => groups_assign_curator,
        "groups.unassignCurator" => groups_unassign_curator,
        "groups.addStudent" => groups_add_student,
        "groups.removeStudent" => groups_remove_student,
        "family.link" => family_link,
        "family.unlink" => family_unlink,
        "assignments.create" => assignments_create,
        "grades.record" => grades_record,
        "absences.record" => absences_record,
        "absences.setExcused" => absences_set_excused,
        "absences.delete" => absences_delete,
        _ => return None,
    };
    Some(f)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f = route(req.method.as_str())?;
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return Some(resp),
    };
    Some(respond(&req.id, f(conn, &req.params)))
}
