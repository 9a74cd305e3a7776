use crate::model::{AbsenceRecord, GradeRecord};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// `numer / denom` rounded to 2 decimals, half away from zero.
///
/// Computed on integers so the result is exact: 183/2 is 91.50, 1/8 is 0.13.
/// An empty denominator yields 0.
pub fn ratio_2dp(numer: i64, denom: u64) -> f64 {
    if denom == 0 {
        return 0.0;
    }
    let n = i128::from(numer) * 100;
    let d = i128::from(denom);
    let q = (2 * n.abs() + d) / (2 * d);
    let cents = if n < 0 { -q } else { q };
    cents as f64 / 100.0
}

pub fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeBucket {
    Excellent,
    Good,
    Satisfactory,
    Poor,
}

impl GradeBucket {
    pub fn of(value: i64) -> Self {
        if value >= 90 {
            GradeBucket::Excellent
        } else if value >= 75 {
            GradeBucket::Good
        } else if value >= 60 {
            GradeBucket::Satisfactory
        } else {
            GradeBucket::Poor
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeDistribution {
    pub excellent: u64,
    pub good: u64,
    pub satisfactory: u64,
    pub poor: u64,
}

impl GradeDistribution {
    pub fn add(&mut self, value: i64) {
        match GradeBucket::of(value) {
            GradeBucket::Excellent => self.excellent += 1,
            GradeBucket::Good => self.good += 1,
            GradeBucket::Satisfactory => self.satisfactory += 1,
            GradeBucket::Poor => self.poor += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.excellent + self.good + self.satisfactory + self.poor
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSummary {
    pub count: u64,
    pub sum: i64,
    pub average: f64,
    pub highest: Option<i64>,
    pub lowest: Option<i64>,
    pub distribution: GradeDistribution,
}

pub fn summarize_grades<'a, I>(grades: I) -> GradeSummary
where
    I: IntoIterator<Item = &'a GradeRecord>,
{
    let mut out = GradeSummary::default();
    for g in grades {
        out.count += 1;
        out.sum += g.value;
        out.highest = Some(out.highest.map_or(g.value, |h| h.max(g.value)));
        out.lowest = Some(out.lowest.map_or(g.value, |l| l.min(g.value)));
        out.distribution.add(g.value);
    }
    out.average = ratio_2dp(out.sum, out.count);
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsenceTotals {
    pub count: u64,
    pub total_hours: i64,
    pub excused_hours: i64,
    pub unexcused_hours: i64,
}

pub fn absence_totals<'a, I>(absences: I) -> AbsenceTotals
where
    I: IntoIterator<Item = &'a AbsenceRecord>,
{
    let mut count = 0;
    let mut total_hours = 0;
    let mut excused_hours = 0;
    for a in absences {
        count += 1;
        total_hours += a.hours;
        if a.is_excused {
            excused_hours += a.hours;
        }
    }
    AbsenceTotals {
        count,
        total_hours,
        excused_hours,
        // Derived so total == excused + unexcused always holds.
        unexcused_hours: total_hours - excused_hours,
    }
}

/// Groups items by key, keeping groups in first-seen order and items in input order.
pub fn group_in_order<'a, T, K, F>(items: &'a [T], key: F) -> Vec<(K, Vec<&'a T>)>
where
    K: Eq + Hash + Clone,
    F: Fn(&T) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, Vec<&T>)> = Vec::new();
    for item in items {
        let k = key(item);
        match index.get(&k) {
            Some(&i) => groups[i].1.push(item),
            None => {
                index.insert(k.clone(), groups.len());
                groups.push((k, vec![item]));
            }
        }
    }
    groups
}

/// Stable descending sort on `metric`, then keep the first `n`.
/// Equal metrics keep their input order.
pub fn top_n<T, F>(mut items: Vec<T>, n: usize, metric: F) -> Vec<T>
where
    F: Fn(&T) -> f64,
{
    sort_desc_by(&mut items, metric);
    items.truncate(n);
    items
}

pub fn sort_desc_by<T, F>(items: &mut [T], metric: F)
where
    F: Fn(&T) -> f64,
{
    items.sort_by(|a, b| metric(b).partial_cmp(&metric(a)).unwrap_or(Ordering::Equal));
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodGrades {
    pub period: String,
    pub count: u64,
    pub average: f64,
}

/// Monthly grade rollups keyed by the UTC month of `gradedAt`, newest first.
pub fn grades_by_month(grades: &[GradeRecord]) -> Vec<PeriodGrades> {
    let mut by_period: BTreeMap<String, (u64, i64)> = BTreeMap::new();
    for g in grades {
        let e = by_period
            .entry(month_key(g.graded_at.date_naive()))
            .or_insert((0, 0));
        e.0 += 1;
        e.1 += g.value;
    }
    by_period
        .into_iter()
        .rev()
        .map(|(period, (count, sum))| PeriodGrades {
            period,
            count,
            average: ratio_2dp(sum, count),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodAbsences {
    pub period: String,
    #[serde(flatten)]
    pub totals: AbsenceTotals,
}

pub fn absences_by_month(absences: &[AbsenceRecord]) -> Vec<PeriodAbsences> {
    let mut by_period: BTreeMap<String, Vec<&AbsenceRecord>> = BTreeMap::new();
    for a in absences {
        by_period.entry(month_key(a.date)).or_default().push(a);
    }
    by_period
        .into_iter()
        .rev()
        .map(|(period, items)| PeriodAbsences {
            period,
            totals: absence_totals(items),
        })
        .collect()
}

pub const UNSPECIFIED_REASON: &str = "Unspecified";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonAbsences {
    pub reason: String,
    #[serde(flatten)]
    pub totals: AbsenceTotals,
}

/// Absences grouped by reason, largest total hours first.
pub fn absences_by_reason(absences: &[AbsenceRecord]) -> Vec<ReasonAbsences> {
    let mut out: Vec<ReasonAbsences> = group_in_order(absences, |a| {
        a.reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(UNSPECIFIED_REASON)
            .to_string()
    })
    .into_iter()
    .map(|(reason, items)| ReasonAbsences {
        reason,
        totals: absence_totals(items),
    })
    .collect();
    sort_desc_by(&mut out, |r| r.totals.total_hours as f64);
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverage {
    pub subject: String,
    pub count: u64,
    pub average: f64,
}

/// Per-subject averages over the grades of that subject only, highest first.
pub fn subject_averages(grades: &[GradeRecord]) -> Vec<SubjectAverage> {
    let mut by_subject: BTreeMap<&str, (u64, i64)> = BTreeMap::new();
    for g in grades {
        let e = by_subject.entry(g.subject_name.as_str()).or_insert((0, 0));
        e.0 += 1;
        e.1 += g.value;
    }
    let mut out: Vec<SubjectAverage> = by_subject
        .into_iter()
        .map(|(subject, (count, sum))| SubjectAverage {
            subject: subject.to_string(),
            count,
            average: ratio_2dp(sum, count),
        })
        .collect();
    sort_desc_by(&mut out, |s| s.average);
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGrades {
    pub student_id: String,
    pub count: u64,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAbsences {
    pub student_id: String,
    #[serde(flatten)]
    pub totals: AbsenceTotals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatePolicy {
    pub top_n: usize,
}

impl Default for AggregatePolicy {
    fn default() -> Self {
        Self { top_n: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeStats {
    pub summary: GradeSummary,
    pub by_month: Vec<PeriodGrades>,
    pub by_subject: Vec<SubjectAverage>,
    pub top_students: Vec<StudentGrades>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsenceStats {
    pub totals: AbsenceTotals,
    pub by_month: Vec<PeriodAbsences>,
    pub by_reason: Vec<ReasonAbsences>,
    pub top_absent_students: Vec<StudentAbsences>,
}

pub fn aggregate_grades(grades: &[GradeRecord], policy: AggregatePolicy) -> GradeStats {
    let per_student: Vec<StudentGrades> = group_in_order(grades, |g| g.student_id.clone())
        .into_iter()
        .map(|(student_id, items)| {
            let s = summarize_grades(items);
            StudentGrades {
                student_id,
                count: s.count,
                average: s.average,
            }
        })
        .collect();
    GradeStats {
        summary: summarize_grades(grades),
        by_month: grades_by_month(grades),
        by_subject: subject_averages(grades),
        top_students: top_n(per_student, policy.top_n, |s| s.average),
    }
}

pub fn aggregate_absences(absences: &[AbsenceRecord], policy: AggregatePolicy) -> AbsenceStats {
    let per_student: Vec<StudentAbsences> = group_in_order(absences, |a| a.student_id.clone())
        .into_iter()
        .map(|(student_id, items)| StudentAbsences {
            student_id,
            totals: absence_totals(items),
        })
        .collect();
    AbsenceStats {
        totals: absence_totals(absences),
        by_month: absences_by_month(absences),
        by_reason: absences_by_reason(absences),
        top_absent_students: top_n(per_student, policy.top_n, |s| s.totals.total_hours as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn grade(student: &str, subject: &str, value: i64, y: i32, m: u32, d: u32) -> GradeRecord {
        GradeRecord {
            id: String::new(),
            student_id: student.to_string(),
            value,
            graded_at: Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap(),
            subject_name: subject.to_string(),
            course_id: String::new(),
            instructor_id: String::new(),
        }
    }

    fn absence(student: &str, hours: i64, excused: bool, reason: Option<&str>, date: &str) -> AbsenceRecord {
        AbsenceRecord {
            id: String::new(),
            student_id: student.to_string(),
            group_id: String::new(),
            instructor_id: String::new(),
            date: date.parse().unwrap(),
            hours,
            is_excused: excused,
            reason: reason.map(str::to_string),
            comment: None,
        }
    }

    #[test]
    fn ratio_rounds_half_away_from_zero() {
        assert_eq!(ratio_2dp(183, 2), 91.5);
        assert_eq!(ratio_2dp(1, 8), 0.13);
        assert_eq!(ratio_2dp(-1, 8), -0.13);
        assert_eq!(ratio_2dp(2, 3), 0.67);
        assert_eq!(ratio_2dp(10, 3), 3.33);
        assert_eq!(ratio_2dp(0, 0), 0.0);
    }

    #[test]
    fn empty_collections_aggregate_to_zero() {
        let g = summarize_grades(&[]);
        assert_eq!(g.average, 0.0);
        assert_eq!(g.count, 0);
        assert_eq!(g.highest, None);
        assert_eq!(g.distribution.total(), 0);

        let a = absence_totals(&[]);
        assert_eq!(a.total_hours, 0);
        assert_eq!(a.total_hours, a.excused_hours + a.unexcused_hours);

        let stats = aggregate_absences(&[], AggregatePolicy::default());
        assert!(stats.by_month.is_empty());
        assert!(stats.top_absent_students.is_empty());
    }

    #[test]
    fn average_of_91_and_92_is_91_50() {
        let grades = vec![
            grade("s1", "Math", 91, 2024, 9, 1),
            grade("s1", "Math", 92, 2024, 9, 2),
        ];
        assert_eq!(summarize_grades(&grades).average, 91.50);
    }

    #[test]
    fn distribution_buckets_partition_the_count() {
        let values = [0, 59, 60, 74, 75, 89, 90, 100, 100];
        let grades: Vec<GradeRecord> = values
            .iter()
            .map(|&v| grade("s1", "Math", v, 2024, 9, 1))
            .collect();
        let s = summarize_grades(&grades);
        assert_eq!(
            s.distribution,
            GradeDistribution {
                excellent: 3,
                good: 2,
                satisfactory: 2,
                poor: 2,
            }
        );
        assert_eq!(s.distribution.total(), s.count);
        assert_eq!(s.highest, Some(100));
        assert_eq!(s.lowest, Some(0));
    }

    #[test]
    fn unexcused_hours_are_derived_from_totals() {
        let items = vec![
            absence("s1", 4, true, Some("Illness"), "2024-10-01"),
            absence("s1", 6, false, None, "2024-10-03"),
        ];
        let t = absence_totals(&items);
        assert_eq!(t.total_hours, 10);
        assert_eq!(t.excused_hours, 4);
        assert_eq!(t.unexcused_hours, 6);
        assert_eq!(t.count, 2);
    }

    #[test]
    fn months_are_listed_newest_first() {
        let grades = vec![
            grade("s1", "Math", 80, 2024, 9, 30),
            grade("s1", "Math", 90, 2024, 11, 2),
            grade("s1", "Math", 70, 2024, 9, 1),
        ];
        let months = grades_by_month(&grades);
        let keys: Vec<&str> = months.iter().map(|m| m.period.as_str()).collect();
        assert_eq!(keys, vec!["2024-11", "2024-09"]);
        assert_eq!(months[1].average, 75.0);
        assert_eq!(months[1].count, 2);
    }

    #[test]
    fn month_key_uses_utc_date() {
        let late = GradeRecord {
            graded_at: chrono::DateTime::parse_from_rfc3339("2024-10-01T01:30:00+03:00")
                .unwrap()
                .with_timezone(&Utc),
            ..grade("s1", "Math", 80, 2024, 1, 1)
        };
        assert_eq!(grades_by_month(&[late])[0].period, "2024-09");
    }

    #[test]
    fn reasons_order_by_total_hours_with_stable_ties() {
        let items = vec![
            absence("s1", 2, false, Some("Late bus"), "2024-10-01"),
            absence("s1", 8, true, Some("Illness"), "2024-10-02"),
            absence("s2", 2, false, None, "2024-10-02"),
            absence("s2", 4, true, Some(" Illness "), "2024-10-04"),
        ];
        let reasons = absences_by_reason(&items);
        let keys: Vec<&str> = reasons.iter().map(|r| r.reason.as_str()).collect();
        assert_eq!(keys, vec!["Illness", "Late bus", UNSPECIFIED_REASON]);
        assert_eq!(reasons[0].totals.total_hours, 12);
    }

    #[test]
    fn subject_average_ignores_other_subjects() {
        let grades = vec![
            grade("s1", "Math", 90, 2024, 9, 1),
            grade("s2", "Math", 71, 2024, 9, 1),
            grade("s2", "History", 60, 2024, 9, 1),
        ];
        let subjects = subject_averages(&grades);
        assert_eq!(subjects[0].subject, "Math");
        assert_eq!(subjects[0].average, 80.5);
        assert_eq!(subjects[0].count, 2);
        assert_eq!(subjects[1].subject, "History");
        assert_eq!(subjects[1].average, 60.0);
    }

    #[test]
    fn top_n_keeps_input_order_on_ties() {
        let items = vec![("a", 5.0), ("b", 7.0), ("c", 5.0), ("d", 7.0), ("e", 1.0)];
        let top = top_n(items, 3, |x| x.1);
        let names: Vec<&str> = top.iter().map(|x| x.0).collect();
        assert_eq!(names, vec!["b", "d", "a"]);
    }

    #[test]
    fn aggregate_absences_ranks_students_by_hours() {
        let items = vec![
            absence("s1", 2, false, None, "2024-10-01"),
            absence("s2", 8, true, None, "2024-10-01"),
            absence("s1", 4, false, None, "2024-11-01"),
        ];
        let stats = aggregate_absences(&items, AggregatePolicy { top_n: 1 });
        assert_eq!(stats.top_absent_students.len(), 1);
        assert_eq!(stats.top_absent_students[0].student_id, "s2");
        assert_eq!(stats.totals.total_hours, 14);
        assert_eq!(stats.by_month[0].period, "2024-11");
    }
}
