use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Administrator,
    Teacher,
    Student,
    Parent,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Administrator => "administrator",
            Role::Teacher => "teacher",
            Role::Student => "student",
            Role::Parent => "parent",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "administrator" | "admin" => Ok(Role::Administrator),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            "parent" => Ok(Role::Parent),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Identity performing a request. Arrives already authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipKind {
    Teacher,
    Student,
}

impl MembershipKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MembershipKind::Teacher => "teacher",
            MembershipKind::Student => "student",
        }
    }
}

impl FromStr for MembershipKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "teacher" => Ok(MembershipKind::Teacher),
            "student" => Ok(MembershipKind::Student),
            other => Err(format!("unknown membership kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRecord {
    #[serde(default)]
    pub id: String,
    pub student_id: String,
    pub value: i64,
    pub graded_at: DateTime<Utc>,
    #[serde(default)]
    pub subject_name: String,
    #[serde(default)]
    pub course_id: String,
    #[serde(default)]
    pub instructor_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsenceRecord {
    #[serde(default)]
    pub id: String,
    pub student_id: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub instructor_id: String,
    pub date: NaiveDate,
    pub hours: i64,
    pub is_excused: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

pub const GRADE_MIN: i64 = 0;
pub const GRADE_MAX: i64 = 100;
pub const ABSENCE_HOURS_MIN: i64 = 2;
pub const ABSENCE_HOURS_MAX: i64 = 16;
