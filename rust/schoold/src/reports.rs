//! Composite reports: a visibility scope narrowed to the report's subject,
//! the facts inside it filtered by date, and the rollups over those facts.
//!
//! Scope is always applied before facts are loaded, so a group or course
//! rollup never includes a student the actor could not see individually.

use crate::access::{ScopeFilter, TargetKind, VisibilityResolver};
use crate::error::{CoreError, CoreResult};
use crate::facts::{
    self, CourseInfo, DateRange, GradeQuery, GroupInfo, StudentRow,
};
use crate::graph::{IdSet, RelationGraph, StoreGraph};
use crate::model::{AbsenceRecord, Actor, GradeRecord, Role};
use crate::params::{opt_count, opt_str, required_str};
use crate::stats::{
    self, AbsenceTotals, GradeDistribution, GradeSummary, PeriodAbsences, PeriodGrades,
    ReasonAbsences, SubjectAverage,
};
use log::debug;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    GroupStatistics,
    ChildrenPerformance,
    CuratorDashboard,
    AbsenceAnalytics,
    StudentPerformance,
    CourseStatistics,
    AvailableStudents,
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "groupStatistics" => Ok(ReportKind::GroupStatistics),
            "childrenPerformance" => Ok(ReportKind::ChildrenPerformance),
            "curatorDashboard" => Ok(ReportKind::CuratorDashboard),
            "absenceAnalytics" => Ok(ReportKind::AbsenceAnalytics),
            "studentPerformance" => Ok(ReportKind::StudentPerformance),
            "courseStatistics" => Ok(ReportKind::CourseStatistics),
            "availableStudents" => Ok(ReportKind::AvailableStudents),
            other => Err(format!("unknown reportKind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reportKind", rename_all = "camelCase")]
pub enum Report {
    GroupStatistics(GroupStatistics),
    ChildrenPerformance(ChildrenPerformance),
    CuratorDashboard(CuratorDashboard),
    AbsenceAnalytics(AbsenceAnalytics),
    StudentPerformance(StudentPerformance),
    CourseStatistics(CourseStatistics),
    AvailableStudents(AvailableStudents),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRollup {
    pub student_id: String,
    pub display_name: String,
    pub grade_count: u64,
    pub average_grade: f64,
    pub distribution: GradeDistribution,
    pub absences: AbsenceTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAbsenceRow {
    pub student_id: String,
    pub display_name: String,
    #[serde(flatten)]
    pub totals: AbsenceTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStatistics {
    pub group: GroupInfo,
    pub student_count: u64,
    pub students_with_grades: u64,
    pub students_with_no_absences: u64,
    pub grades: GradeSummary,
    pub subjects: Vec<SubjectAverage>,
    pub absences: AbsenceTotals,
    /// Total hours over every student in the rollup.
    pub average_absence_hours_per_student: f64,
    /// Total hours over students with at least one absence.
    pub average_absence_hours_per_absent_student: f64,
    pub students: Vec<StudentRollup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildPerformance {
    pub student_id: String,
    pub display_name: String,
    pub group_id: Option<String>,
    pub grades: GradeSummary,
    pub subjects: Vec<SubjectAverage>,
    pub grades_by_month: Vec<PeriodGrades>,
    pub absences: AbsenceTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildrenPerformance {
    pub parent_id: String,
    pub parent_name: Option<String>,
    pub children: Vec<ChildPerformance>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CuratorDashboard {
    pub group: GroupInfo,
    pub student_count: u64,
    pub grades: GradeSummary,
    pub subjects: Vec<SubjectAverage>,
    pub absences: AbsenceTotals,
    pub top_absent_students: Vec<StudentAbsenceRow>,
    pub absences_by_month: Vec<PeriodAbsences>,
    pub grades_by_month: Vec<PeriodGrades>,
    /// Students averaging below 60, lowest average first.
    pub students_at_risk: Vec<StudentRollup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsenceAnalytics {
    pub student_count: u64,
    pub students_with_absences: u64,
    pub totals: AbsenceTotals,
    pub excused_share_percent: f64,
    pub average_hours_per_student: f64,
    pub average_hours_per_absent_student: f64,
    pub by_month: Vec<PeriodAbsences>,
    pub by_reason: Vec<ReasonAbsences>,
    pub by_student: Vec<StudentAbsenceRow>,
    pub top_absent_students: Vec<StudentAbsenceRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentPerformance {
    pub student: StudentRow,
    pub grades: GradeSummary,
    pub subjects: Vec<SubjectAverage>,
    pub grades_by_month: Vec<PeriodGrades>,
    pub absences: AbsenceTotals,
    pub absences_by_month: Vec<PeriodAbsences>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGradeRow {
    pub student_id: String,
    pub display_name: String,
    pub count: u64,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseStatistics {
    pub course: CourseInfo,
    pub teacher_ids: Vec<String>,
    pub student_count: u64,
    pub grades: GradeSummary,
    pub grades_by_month: Vec<PeriodGrades>,
    pub students: Vec<StudentGradeRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableStudent {
    pub student_id: String,
    pub display_name: String,
    pub group_id: Option<String>,
    pub in_curated_group: bool,
    pub shared_courses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableStudents {
    pub students: Vec<AvailableStudent>,
}

/// Per-student rollups in the order of `students`.
fn rollups(
    students: &[StudentRow],
    grades: &[GradeRecord],
    absences: &[AbsenceRecord],
) -> Vec<StudentRollup> {
    let mut grades_by: HashMap<&str, Vec<&GradeRecord>> = HashMap::new();
    for g in grades {
        grades_by.entry(g.student_id.as_str()).or_default().push(g);
    }
    let mut absences_by: HashMap<&str, Vec<&AbsenceRecord>> = HashMap::new();
    for a in absences {
        absences_by.entry(a.student_id.as_str()).or_default().push(a);
    }
    students
        .iter()
        .map(|s| {
            let g = stats::summarize_grades(
                grades_by.get(s.id.as_str()).into_iter().flatten().copied(),
            );
            let a = stats::absence_totals(
                absences_by.get(s.id.as_str()).into_iter().flatten().copied(),
            );
            StudentRollup {
                student_id: s.id.clone(),
                display_name: s.display_name.clone(),
                grade_count: g.count,
                average_grade: g.average,
                distribution: g.distribution,
                absences: a,
            }
        })
        .collect()
}

fn absence_rows(rollups: &[StudentRollup]) -> Vec<StudentAbsenceRow> {
    let mut rows: Vec<StudentAbsenceRow> = rollups
        .iter()
        .filter(|r| r.absences.count > 0)
        .map(|r| StudentAbsenceRow {
            student_id: r.student_id.clone(),
            display_name: r.display_name.clone(),
            totals: r.absences,
        })
        .collect();
    stats::sort_desc_by(&mut rows, |r| r.totals.total_hours as f64);
    rows
}

struct Composer<'c> {
    conn: &'c Connection,
    graph: StoreGraph<'c>,
    actor: &'c Actor,
    range: DateRange,
    top_n: usize,
}

impl<'c> Composer<'c> {
    fn resolver(&self) -> VisibilityResolver<'_, StoreGraph<'c>> {
        VisibilityResolver::new(&self.graph)
    }

    /// `candidates` restricted to the actor's scope, in name order.
    fn visible(&self, candidates: IdSet) -> CoreResult<Vec<StudentRow>> {
        let scope = self.resolver().base_scope(self.actor)?;
        let ids: IdSet = candidates.into_iter().filter(|s| scope.contains(s)).collect();
        facts::students_by_name(self.conn, &ids)
    }

    fn grades(&self, students: &[StudentRow]) -> CoreResult<Vec<GradeRecord>> {
        facts::grades_for(
            self.conn,
            students,
            &GradeQuery {
                range: self.range,
                course_id: None,
            },
        )
    }

    fn absences(&self, students: &[StudentRow]) -> CoreResult<Vec<AbsenceRecord>> {
        facts::absences_for(self.conn, students, &self.range)
    }

    /// Absences stamped with `group_id`, including those of former members
    /// the actor can still see.
    fn group_absences(&self, group_id: &str) -> CoreResult<Vec<AbsenceRecord>> {
        let scope = self.resolver().base_scope(self.actor)?;
        facts::group_absences(self.conn, group_id, &scope, &self.range)
    }

    fn group(&self, group_id: &str) -> CoreResult<GroupInfo> {
        facts::group_info(self.conn, group_id)?.ok_or_else(|| CoreError::not_found("group"))
    }

    fn group_statistics(&self, filters: &serde_json::Value) -> CoreResult<GroupStatistics> {
        let group_id = required_str(filters, "groupId")?;
        self.resolver().require(self.actor, TargetKind::Group, group_id)?;
        let group = self.group(group_id)?;

        let students = self.visible(self.graph.members_of(group_id)?)?;
        let grades = self.grades(&students)?;
        let absences = self.group_absences(group_id)?;

        let mut per_student = rollups(&students, &grades, &absences);
        let student_count = per_student.len() as u64;
        let with_grades = per_student.iter().filter(|r| r.grade_count > 0).count() as u64;
        let without_absences = per_student.iter().filter(|r| r.absences.count == 0).count() as u64;
        let with_absences = absences
            .iter()
            .map(|a| a.student_id.as_str())
            .collect::<BTreeSet<_>>()
            .len() as u64;
        let totals = stats::absence_totals(&absences);
        stats::sort_desc_by(&mut per_student, |r| r.average_grade);

        Ok(GroupStatistics {
            group,
            student_count,
            students_with_grades: with_grades,
            students_with_no_absences: without_absences,
            grades: stats::summarize_grades(&grades),
            subjects: stats::subject_averages(&grades),
            absences: totals,
            average_absence_hours_per_student: stats::ratio_2dp(totals.total_hours, student_count),
            average_absence_hours_per_absent_student: stats::ratio_2dp(
                totals.total_hours,
                with_absences,
            ),
            students: per_student,
        })
    }

    fn children_performance(&self, filters: &serde_json::Value) -> CoreResult<ChildrenPerformance> {
        let parent_id = match self.actor.role {
            Role::Parent => self.actor.id.clone(),
            Role::Administrator => {
                let id = required_str(filters, "parentId")?;
                if self.graph.role_of(id)? != Some(Role::Parent) {
                    return Err(CoreError::not_found("parent"));
                }
                id.to_string()
            }
            Role::Teacher | Role::Student => {
                return Err(CoreError::Forbidden(format!(
                    "{} may not view children performance",
                    self.actor.role
                )))
            }
        };

        let mut children = self.graph.children_of(&parent_id)?;
        if let Some(child_id) = opt_str(filters, "childId") {
            if self.graph.role_of(child_id)? != Some(Role::Student) {
                return Err(CoreError::not_found("student"));
            }
            if !children.contains(child_id) {
                return Err(CoreError::Forbidden("not a child of this parent".to_string()));
            }
            children = IdSet::from([child_id.to_string()]);
        }

        let students = facts::students_by_name(self.conn, &children)?;
        let grades = self.grades(&students)?;
        let absences = self.absences(&students)?;

        let mut out: Vec<ChildPerformance> = students
            .iter()
            .map(|s| {
                let own_grades: Vec<GradeRecord> = grades
                    .iter()
                    .filter(|g| g.student_id == s.id)
                    .cloned()
                    .collect();
                ChildPerformance {
                    student_id: s.id.clone(),
                    display_name: s.display_name.clone(),
                    group_id: s.group_id.clone(),
                    grades: stats::summarize_grades(&own_grades),
                    subjects: stats::subject_averages(&own_grades),
                    grades_by_month: stats::grades_by_month(&own_grades),
                    absences: stats::absence_totals(
                        absences.iter().filter(|a| a.student_id == s.id),
                    ),
                }
            })
            .collect();
        stats::sort_desc_by(&mut out, |c| c.grades.average);

        Ok(ChildrenPerformance {
            parent_name: facts::display_name(self.conn, &parent_id)?,
            parent_id,
            children: out,
        })
    }

    fn curator_dashboard(&self, filters: &serde_json::Value) -> CoreResult<CuratorDashboard> {
        let group_id = match self.actor.role {
            Role::Teacher => match opt_str(filters, "groupId") {
                Some(id) => id.to_string(),
                None => self
                    .graph
                    .group_curated_by(&self.actor.id)?
                    .ok_or_else(|| CoreError::not_found("curated group"))?,
            },
            Role::Administrator => required_str(filters, "groupId")?.to_string(),
            Role::Student | Role::Parent => {
                return Err(CoreError::Forbidden(format!(
                    "{} may not view a curator dashboard",
                    self.actor.role
                )))
            }
        };
        self.resolver().require(self.actor, TargetKind::Group, &group_id)?;
        let group = self.group(&group_id)?;

        let students = self.visible(self.graph.members_of(&group_id)?)?;
        let grades = self.grades(&students)?;
        let absences = self.group_absences(&group_id)?;
        let per_student = rollups(&students, &grades, &absences);

        let mut at_risk: Vec<StudentRollup> = per_student
            .iter()
            .filter(|r| r.grade_count > 0 && r.average_grade < 60.0)
            .cloned()
            .collect();
        stats::sort_desc_by(&mut at_risk, |r| -r.average_grade);

        let mut top_absent = absence_rows(&per_student);
        top_absent.truncate(self.top_n);

        Ok(CuratorDashboard {
            group,
            student_count: students.len() as u64,
            grades: stats::summarize_grades(&grades),
            subjects: stats::subject_averages(&grades),
            absences: stats::absence_totals(&absences),
            top_absent_students: top_absent,
            absences_by_month: stats::absences_by_month(&absences),
            grades_by_month: stats::grades_by_month(&grades),
            students_at_risk: at_risk,
        })
    }

    fn absence_analytics(&self, filters: &serde_json::Value) -> CoreResult<AbsenceAnalytics> {
        let filter = ScopeFilter {
            group_id: opt_str(filters, "groupId").map(str::to_string),
            course_id: opt_str(filters, "courseId").map(str::to_string),
        };
        let mut scope = self.resolver().resolve_scope(self.actor, &filter)?;
        if let Some(student_id) = opt_str(filters, "studentId") {
            self.resolver()
                .require(self.actor, TargetKind::Student, student_id)?;
            scope.retain(|s| s == student_id);
        }

        let students = facts::students_by_name(self.conn, &scope)?;
        let mut absences = self.absences(&students)?;
        if let Some(group_id) = filter.group_id.as_deref() {
            absences.retain(|a| a.group_id == group_id);
        }
        let per_student = rollups(&students, &[], &absences);
        let by_student = absence_rows(&per_student);
        let aggregated = stats::aggregate_absences(
            &absences,
            stats::AggregatePolicy { top_n: self.top_n },
        );

        let student_count = students.len() as u64;
        let with_absences = by_student.len() as u64;
        let totals = aggregated.totals;
        let mut top = by_student.clone();
        top.truncate(self.top_n);

        Ok(AbsenceAnalytics {
            student_count,
            students_with_absences: with_absences,
            totals,
            excused_share_percent: stats::ratio_2dp(
                totals.excused_hours * 100,
                totals.total_hours.max(0) as u64,
            ),
            average_hours_per_student: stats::ratio_2dp(totals.total_hours, student_count),
            average_hours_per_absent_student: stats::ratio_2dp(totals.total_hours, with_absences),
            by_month: aggregated.by_month,
            by_reason: aggregated.by_reason,
            by_student,
            top_absent_students: top,
        })
    }

    fn student_performance(&self, filters: &serde_json::Value) -> CoreResult<StudentPerformance> {
        let student_id = required_str(filters, "studentId")?;
        self.resolver()
            .require(self.actor, TargetKind::Student, student_id)?;

        let students = facts::students_by_name(self.conn, &IdSet::from([student_id.to_string()]))?;
        let Some(student) = students.first().cloned() else {
            return Err(CoreError::not_found("student"));
        };
        let grades = facts::grades_for(
            self.conn,
            &students,
            &GradeQuery {
                range: self.range,
                course_id: opt_str(filters, "courseId"),
            },
        )?;
        let absences = self.absences(&students)?;

        Ok(StudentPerformance {
            student,
            grades: stats::summarize_grades(&grades),
            subjects: stats::subject_averages(&grades),
            grades_by_month: stats::grades_by_month(&grades),
            absences: stats::absence_totals(&absences),
            absences_by_month: stats::absences_by_month(&absences),
        })
    }

    fn course_statistics(&self, filters: &serde_json::Value) -> CoreResult<CourseStatistics> {
        let course_id = required_str(filters, "courseId")?;
        self.resolver()
            .require(self.actor, TargetKind::Course, course_id)?;
        let course =
            facts::course_info(self.conn, course_id)?.ok_or_else(|| CoreError::not_found("course"))?;

        let students = self.visible(self.graph.students_of(course_id)?)?;
        let grades = facts::grades_for(
            self.conn,
            &students,
            &GradeQuery {
                range: self.range,
                course_id: Some(course_id),
            },
        )?;

        let mut rows: Vec<StudentGradeRow> = rollups(&students, &grades, &[])
            .into_iter()
            .map(|r| StudentGradeRow {
                student_id: r.student_id,
                display_name: r.display_name,
                count: r.grade_count,
                average: r.average_grade,
            })
            .collect();
        stats::sort_desc_by(&mut rows, |r| r.average);

        Ok(CourseStatistics {
            course,
            teacher_ids: self.graph.teachers_of(course_id)?.into_iter().collect(),
            student_count: students.len() as u64,
            grades: stats::summarize_grades(&grades),
            grades_by_month: stats::grades_by_month(&grades),
            students: rows,
        })
    }

    fn available_students(&self, filters: &serde_json::Value) -> CoreResult<AvailableStudents> {
        let filter = ScopeFilter {
            group_id: opt_str(filters, "groupId").map(str::to_string),
            course_id: opt_str(filters, "courseId").map(str::to_string),
        };
        let scope = self.resolver().resolve_scope(self.actor, &filter)?;
        let students = facts::students_by_name(self.conn, &scope)?;

        let (curated, taught) = if self.actor.role == Role::Teacher {
            let curated = self.graph.group_curated_by(&self.actor.id)?;
            let mut taught: Vec<(String, IdSet)> = Vec::new();
            for course_id in self.graph.courses_taught_by(&self.actor.id)? {
                let enrolled = self.graph.students_of(&course_id)?;
                taught.push((course_id, enrolled));
            }
            (curated, taught)
        } else {
            (None, Vec::new())
        };

        let students = students
            .into_iter()
            .map(|s| AvailableStudent {
                in_curated_group: curated.is_some() && s.group_id == curated,
                shared_courses: taught
                    .iter()
                    .filter(|(_, enrolled)| enrolled.contains(&s.id))
                    .map(|(c, _)| c.clone())
                    .collect(),
                student_id: s.id,
                display_name: s.display_name,
                group_id: s.group_id,
            })
            .collect();
        Ok(AvailableStudents { students })
    }
}

/// Builds one report for `actor`. `conn` should be a read transaction so
/// every lookup sees the same snapshot.
pub fn compose_report(
    conn: &Connection,
    actor: &Actor,
    kind: ReportKind,
    filters: &serde_json::Value,
    default_top_n: usize,
) -> CoreResult<Report> {
    let composer = Composer {
        conn,
        graph: StoreGraph::new(conn),
        actor,
        range: DateRange::parse(filters)?,
        top_n: opt_count(filters, "topN", default_top_n)?,
    };
    debug!("composing {:?} for {} {}", kind, actor.role, actor.id);
    Ok(match kind {
        ReportKind::GroupStatistics => Report::GroupStatistics(composer.group_statistics(filters)?),
        ReportKind::ChildrenPerformance => {
            Report::ChildrenPerformance(composer.children_performance(filters)?)
        }
        ReportKind::CuratorDashboard => {
            Report::CuratorDashboard(composer.curator_dashboard(filters)?)
        }
        ReportKind::AbsenceAnalytics => {
            Report::AbsenceAnalytics(composer.absence_analytics(filters)?)
        }
        ReportKind::StudentPerformance => {
            Report::StudentPerformance(composer.student_performance(filters)?)
        }
        ReportKind::CourseStatistics => {
            Report::CourseStatistics(composer.course_statistics(filters)?)
        }
        ReportKind::AvailableStudents => {
            Report::AvailableStudents(composer.available_students(filters)?)
        }
    })
}
