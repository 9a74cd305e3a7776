use crate::error::{CoreError, CoreResult};
use crate::graph::IdSet;
use crate::model::{AbsenceRecord, GradeRecord};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

/// Inclusive date window compared at day granularity. An inverted window
/// (end before start) is accepted and simply matches nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }

    pub fn parse(params: &serde_json::Value) -> CoreResult<Self> {
        Ok(Self {
            start: parse_date_param(params, "startDate")?,
            end: parse_date_param(params, "endDate")?,
        })
    }
}

fn parse_date_param(params: &serde_json::Value, key: &str) -> CoreResult<Option<NaiveDate>> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(CoreError::bad_params(format!("{} must be YYYY-MM-DD", key)));
            };
            parse_day(s)
                .map(Some)
                .ok_or_else(|| CoreError::bad_params(format!("{} must be YYYY-MM-DD", key)))
        }
    }
}

/// Accepts a plain date or a full RFC 3339 timestamp (its UTC date is used).
pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    let t = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Some(d);
    }
    DateTime::parse_from_rfc3339(t)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).date_naive())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub display_name: String,
    pub group_id: Option<String>,
}

/// Students in `ids`, ordered by last name, first name, then id.
pub fn students_by_name(conn: &Connection, ids: &IdSet) -> CoreResult<Vec<StudentRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT u.last_name, u.first_name, gm.group_id
         FROM users u
         LEFT JOIN group_members gm ON gm.student_id = u.id
         WHERE u.id = ?",
    )?;
    let mut rows: Vec<(String, String, StudentRow)> = Vec::with_capacity(ids.len());
    for id in ids {
        let row = stmt
            .query_row([id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                ))
            })
            .optional()?;
        let Some((last, first, group_id)) = row else {
            continue;
        };
        rows.push((
            last.clone(),
            first.clone(),
            StudentRow {
                id: id.clone(),
                display_name: format!("{}, {}", last, first),
                group_id,
            },
        ));
    }
    rows.sort_by(|a, b| (&a.0, &a.1, &a.2.id).cmp(&(&b.0, &b.1, &b.2.id)));
    Ok(rows.into_iter().map(|(_, _, s)| s).collect())
}

pub fn display_name(conn: &Connection, user_id: &str) -> CoreResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT last_name, first_name FROM users WHERE id = ?",
            [user_id],
            |r| Ok(format!("{}, {}", r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )
        .optional()?)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub id: String,
    pub name: String,
    pub curator_id: Option<String>,
}

pub fn group_info(conn: &Connection, group_id: &str) -> CoreResult<Option<GroupInfo>> {
    Ok(conn
        .query_row(
            "SELECT id, name, curator_id FROM student_groups WHERE id = ?",
            [group_id],
            |r| {
                Ok(GroupInfo {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    curator_id: r.get(2)?,
                })
            },
        )
        .optional()?)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseInfo {
    pub id: String,
    pub name: String,
    pub subject: String,
}

pub fn course_info(conn: &Connection, course_id: &str) -> CoreResult<Option<CourseInfo>> {
    Ok(conn
        .query_row(
            "SELECT c.id, c.name, s.name
             FROM courses c
             JOIN subjects s ON s.id = c.subject_id
             WHERE c.id = ?",
            [course_id],
            |r| {
                Ok(CourseInfo {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    subject: r.get(2)?,
                })
            },
        )
        .optional()?)
}

#[derive(Debug, Clone, Default)]
pub struct GradeQuery<'a> {
    pub range: DateRange,
    pub course_id: Option<&'a str>,
}

/// Grades of the given students, in the given student order, oldest first per student.
pub fn grades_for(
    conn: &Connection,
    students: &[StudentRow],
    query: &GradeQuery<'_>,
) -> CoreResult<Vec<GradeRecord>> {
    let mut stmt = conn.prepare_cached(
        "SELECT g.id, g.student_id, g.value, g.graded_at, s.name, c.id, g.instructor_id
         FROM grades g
         JOIN assignments a ON a.id = g.assignment_id
         JOIN courses c ON c.id = a.course_id
         JOIN subjects s ON s.id = c.subject_id
         WHERE g.student_id = ?
         ORDER BY g.graded_at, g.id",
    )?;
    let mut out = Vec::new();
    for student in students {
        let rows = stmt
            .query_map([&student.id], |r| {
                Ok(GradeRecord {
                    id: r.get(0)?,
                    student_id: r.get(1)?,
                    value: r.get(2)?,
                    graded_at: r.get::<_, DateTime<Utc>>(3)?,
                    subject_name: r.get(4)?,
                    course_id: r.get(5)?,
                    instructor_id: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        out.extend(rows.into_iter().filter(|g| {
            query.range.contains(g.graded_at.date_naive())
                && query.course_id.map_or(true, |c| g.course_id == c)
        }));
    }
    Ok(out)
}

fn absence_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<AbsenceRecord> {
    Ok(AbsenceRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        group_id: r.get(2)?,
        instructor_id: r.get(3)?,
        date: r.get::<_, NaiveDate>(4)?,
        hours: r.get(5)?,
        is_excused: r.get::<_, i64>(6)? != 0,
        reason: r.get(7)?,
        comment: r.get(8)?,
    })
}

/// Absences of the given students, in the given student order, oldest first per student.
pub fn absences_for(
    conn: &Connection,
    students: &[StudentRow],
    range: &DateRange,
) -> CoreResult<Vec<AbsenceRecord>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, student_id, group_id, instructor_id, date, hours, is_excused, reason, comment
         FROM absences
         WHERE student_id = ?
         ORDER BY date, id",
    )?;
    let mut out = Vec::new();
    for student in students {
        let rows = stmt
            .query_map([&student.id], absence_row)?
            .collect::<Result<Vec<_>, _>>()?;
        out.extend(rows.into_iter().filter(|a| range.contains(a.date)));
    }
    Ok(out)
}

/// Absences recorded against a group, whoever its members are now.
/// Only students in `scope` are kept; oldest first.
pub fn group_absences(
    conn: &Connection,
    group_id: &str,
    scope: &IdSet,
    range: &DateRange,
) -> CoreResult<Vec<AbsenceRecord>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, student_id, group_id, instructor_id, date, hours, is_excused, reason, comment
         FROM absences
         WHERE group_id = ?
         ORDER BY date, id",
    )?;
    let rows = stmt
        .query_map([group_id], absence_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .filter(|a| scope.contains(&a.student_id) && range.contains(a.date))
        .collect())
}
