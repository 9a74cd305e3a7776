use super::{IdSet, RelationGraph};
use crate::error::CoreResult;
use crate::model::Role;
use rusqlite::{Connection, OptionalExtension};

/// SQLite-backed relation graph. Pass a `Transaction` (it derefs to
/// `Connection`) to get snapshot reads for the whole request.
pub struct StoreGraph<'c> {
    conn: &'c Connection,
}

impl<'c> StoreGraph<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn id_set(&self, sql: &str, key: &str) -> CoreResult<IdSet> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map([key], |r| r.get::<_, String>(0))?
            .collect::<Result<IdSet, _>>()?;
        Ok(rows)
    }

    fn exists(&self, sql: &str, key: &str) -> CoreResult<bool> {
        Ok(self
            .conn
            .query_row(sql, [key], |r| r.get::<_, i64>(0))
            .optional()?
            .is_some())
    }
}

impl RelationGraph for StoreGraph<'_> {
    fn role_of(&self, user_id: &str) -> CoreResult<Option<Role>> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT role FROM users WHERE id = ?", [user_id], |r| {
                r.get(0)
            })
            .optional()?;
        // Unknown role strings are treated as a missing user.
        Ok(raw.and_then(|s| s.parse::<Role>().ok()))
    }

    fn group_exists(&self, group_id: &str) -> CoreResult<bool> {
        self.exists("SELECT 1 FROM student_groups WHERE id = ?", group_id)
    }

    fn course_exists(&self, course_id: &str) -> CoreResult<bool> {
        self.exists("SELECT 1 FROM courses WHERE id = ?", course_id)
    }

    fn courses_taught_by(&self, user_id: &str) -> CoreResult<IdSet> {
        self.id_set(
            "SELECT course_id FROM course_members WHERE user_id = ? AND kind = 'teacher'",
            user_id,
        )
    }

    fn courses_attended_by(&self, user_id: &str) -> CoreResult<IdSet> {
        self.id_set(
            "SELECT course_id FROM course_members WHERE user_id = ? AND kind = 'student'",
            user_id,
        )
    }

    fn teachers_of(&self, course_id: &str) -> CoreResult<IdSet> {
        self.id_set(
            "SELECT user_id FROM course_members WHERE course_id = ? AND kind = 'teacher'",
            course_id,
        )
    }

    fn students_of(&self, course_id: &str) -> CoreResult<IdSet> {
        self.id_set(
            "SELECT user_id FROM course_members WHERE course_id = ? AND kind = 'student'",
            course_id,
        )
    }

    fn group_curated_by(&self, user_id: &str) -> CoreResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM student_groups WHERE curator_id = ? ORDER BY id LIMIT 1",
                [user_id],
                |r| r.get(0),
            )
            .optional()?)
    }

    fn group_of(&self, student_id: &str) -> CoreResult<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT group_id FROM group_members WHERE student_id = ?",
                [student_id],
                |r| r.get(0),
            )
            .optional()?)
    }

    fn members_of(&self, group_id: &str) -> CoreResult<IdSet> {
        self.id_set(
            "SELECT student_id FROM group_members WHERE group_id = ?",
            group_id,
        )
    }

    fn children_of(&self, parent_id: &str) -> CoreResult<IdSet> {
        self.id_set(
            "SELECT child_id FROM parent_children WHERE parent_id = ?",
            parent_id,
        )
    }

    fn parents_of(&self, student_id: &str) -> CoreResult<IdSet> {
        self.id_set(
            "SELECT parent_id FROM parent_children WHERE child_id = ?",
            student_id,
        )
    }

    fn all_students(&self) -> CoreResult<IdSet> {
        self.id_set("SELECT id FROM users WHERE role = ?", Role::Student.as_str())
    }

    fn is_teaching_student(&self, teacher_id: &str, student_id: &str) -> CoreResult<bool> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1
                 FROM course_members t
                 JOIN course_members s ON s.course_id = t.course_id
                 WHERE t.user_id = ? AND t.kind = 'teacher'
                   AND s.user_id = ? AND s.kind = 'student'
                 LIMIT 1",
                (teacher_id, student_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some())
    }
}
