use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

struct Sidecar {
    _child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    fn open(prefix: &str) -> Self {
        let workspace = temp_dir(prefix);
        let (child, stdin, reader) = spawn_sidecar();
        let mut sidecar = Sidecar {
            _child: child,
            stdin,
            reader,
            next_id: 0,
        };
        sidecar.ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        sidecar
    }

    fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        assert!(!line.trim().is_empty(), "empty response for {}", method);
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    fn error_code(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.request(method, params);
        assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "{}", value);
        value["error"]["code"].as_str().unwrap_or_default().to_string()
    }
}

fn admin() -> serde_json::Value {
    json!({ "id": "root", "role": "administrator" })
}

fn actor(id: &str, role: &str) -> serde_json::Value {
    json!({ "id": id, "role": role })
}

fn create_user(s: &mut Sidecar, role: &str, first: &str, last: &str) -> String {
    let res = s.ok(
        "users.create",
        json!({ "actor": admin(), "role": role, "firstName": first, "lastName": last }),
    );
    res["userId"].as_str().expect("userId").to_string()
}

fn create_group(s: &mut Sidecar, name: &str) -> String {
    let res = s.ok("groups.create", json!({ "actor": admin(), "name": name }));
    res["groupId"].as_str().expect("groupId").to_string()
}

fn create_course(s: &mut Sidecar, name: &str, teacher: &str) -> String {
    let subject = s.ok("subjects.create", json!({ "actor": admin(), "name": name }));
    let res = s.ok(
        "courses.create",
        json!({
            "actor": admin(),
            "name": name,
            "subjectId": subject["subjectId"],
            "teacherId": teacher
        }),
    );
    res["courseId"].as_str().expect("courseId").to_string()
}

fn enroll(s: &mut Sidecar, course: &str, student: &str) {
    s.ok(
        "courses.addMember",
        json!({ "actor": admin(), "courseId": course, "userId": student, "kind": "student" }),
    );
}

fn place(s: &mut Sidecar, group: &str, student: &str) {
    s.ok(
        "groups.addStudent",
        json!({ "actor": admin(), "groupId": group, "studentId": student }),
    );
}

fn scope_ids(result: &serde_json::Value) -> Vec<String> {
    let mut ids: Vec<String> = result["studentIds"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    ids.sort();
    ids
}

#[test]
fn teacher_scope_is_union_of_taught_and_curated() {
    let mut s = Sidecar::open("schoold-scope-union");
    let teacher = create_user(&mut s, "teacher", "Tess", "Teacher");
    let s1 = create_user(&mut s, "student", "Ann", "Alpha");
    let s2 = create_user(&mut s, "student", "Ben", "Beta");
    let s3 = create_user(&mut s, "student", "Cal", "Gamma");
    let s4 = create_user(&mut s, "student", "Dee", "Delta");

    let course = create_course(&mut s, "Math", &teacher);
    enroll(&mut s, &course, &s1);
    enroll(&mut s, &course, &s2);
    let group = create_group(&mut s, "10A");
    s.ok(
        "groups.assignCurator",
        json!({ "actor": admin(), "groupId": group, "teacherId": teacher }),
    );
    place(&mut s, &group, &s2);
    place(&mut s, &group, &s3);

    let scope = s.ok("access.scope", json!({ "actor": actor(&teacher, "teacher") }));
    assert_eq!(scope["count"], json!(3));
    let mut expected = vec![s1.clone(), s2.clone(), s3.clone()];
    expected.sort();
    assert_eq!(scope_ids(&scope), expected);

    let narrowed = s.ok(
        "access.scope",
        json!({ "actor": actor(&teacher, "teacher"), "groupId": group }),
    );
    assert_eq!(narrowed["count"], json!(2));

    let resolve = |s: &mut Sidecar, kind: &str, target: &str| -> String {
        let res = s.ok(
            "access.resolve",
            json!({ "actor": actor(&teacher, "teacher"), "targetKind": kind, "targetId": target }),
        );
        res["access"].as_str().unwrap_or_default().to_string()
    };
    assert_eq!(resolve(&mut s, "student", &s3), "allow");
    assert_eq!(resolve(&mut s, "student", &s4), "forbidden");
    assert_eq!(resolve(&mut s, "student", "no-such-student"), "notFound");
    assert_eq!(resolve(&mut s, "group", "no-such-group"), "notFound");
}

#[test]
fn parents_see_only_linked_children() {
    let mut s = Sidecar::open("schoold-parent-scope");
    let parent = create_user(&mut s, "parent", "Pat", "Parent");
    let child = create_user(&mut s, "student", "Kid", "Parent");
    let stranger = create_user(&mut s, "student", "Sam", "Stranger");
    let group = create_group(&mut s, "7B");
    place(&mut s, &group, &child);
    place(&mut s, &group, &stranger);

    let linked = s.ok(
        "family.link",
        json!({ "actor": admin(), "parentId": parent, "childId": child }),
    );
    assert_eq!(linked["parentIds"], json!([parent.clone()]));

    let scope = s.ok("access.scope", json!({ "actor": actor(&parent, "parent") }));
    assert_eq!(scope_ids(&scope), vec![child.clone()]);

    let code = s.error_code(
        "reports.compose",
        json!({
            "actor": actor(&parent, "parent"),
            "reportKind": "studentPerformance",
            "filters": { "studentId": stranger }
        }),
    );
    assert_eq!(code, "forbidden");

    let missing = s.error_code(
        "reports.compose",
        json!({
            "actor": actor(&parent, "parent"),
            "reportKind": "studentPerformance",
            "filters": { "studentId": "ghost" }
        }),
    );
    assert_eq!(missing, "not_found");

    let own = s.ok(
        "reports.compose",
        json!({
            "actor": actor(&parent, "parent"),
            "reportKind": "studentPerformance",
            "filters": { "studentId": child }
        }),
    );
    assert_eq!(own["reportKind"], json!("studentPerformance"));
    assert_eq!(own["student"]["id"], json!(child));
}

#[test]
fn roster_invariants_reject_conflicts() {
    let mut s = Sidecar::open("schoold-roster-invariants");
    let t1 = create_user(&mut s, "teacher", "Una", "One");
    let t2 = create_user(&mut s, "teacher", "Two", "Second");
    let g1 = create_group(&mut s, "9A");
    let g2 = create_group(&mut s, "9B");

    s.ok(
        "groups.assignCurator",
        json!({ "actor": admin(), "groupId": g1, "teacherId": t1 }),
    );
    let taken = s.error_code(
        "groups.assignCurator",
        json!({ "actor": admin(), "groupId": g1, "teacherId": t2 }),
    );
    assert_eq!(taken, "conflict");
    let busy = s.error_code(
        "groups.assignCurator",
        json!({ "actor": admin(), "groupId": g2, "teacherId": t1 }),
    );
    assert_eq!(busy, "conflict");

    let course = create_course(&mut s, "Physics", &t1);
    let last = s.error_code(
        "courses.removeTeacher",
        json!({ "actor": admin(), "courseId": course, "teacherId": t1 }),
    );
    assert_eq!(last, "conflict");

    s.ok(
        "courses.addMember",
        json!({ "actor": admin(), "courseId": course, "userId": t2, "kind": "teacher" }),
    );
    s.ok(
        "courses.removeTeacher",
        json!({ "actor": admin(), "courseId": course, "teacherId": t1 }),
    );

    let student = create_user(&mut s, "student", "Stu", "Dent");
    place(&mut s, &g1, &student);
    let moved = s.ok(
        "groups.addStudent",
        json!({ "actor": admin(), "groupId": g2, "studentId": student }),
    );
    assert_eq!(moved["previousGroupId"], json!(g1));
}

#[test]
fn group_statistics_over_recorded_facts() {
    let mut s = Sidecar::open("schoold-group-stats");
    let curator = create_user(&mut s, "teacher", "Cora", "Curator");
    let outsider = create_user(&mut s, "teacher", "Olga", "Outsider");
    let s1 = create_user(&mut s, "student", "Ann", "Alpha");
    let s2 = create_user(&mut s, "student", "Ben", "Beta");
    let group = create_group(&mut s, "11C");
    s.ok(
        "groups.assignCurator",
        json!({ "actor": admin(), "groupId": group, "teacherId": curator }),
    );
    place(&mut s, &group, &s1);
    place(&mut s, &group, &s2);

    let course = create_course(&mut s, "Chemistry", &curator);
    enroll(&mut s, &course, &s1);
    for (title, value, at) in [
        ("Lab 1", 90, "2024-10-03T09:00:00Z"),
        ("Lab 2", 93, "2024-10-10T09:00:00Z"),
    ] {
        let a = s.ok(
            "assignments.create",
            json!({ "actor": actor(&curator, "teacher"), "courseId": course, "title": title }),
        );
        s.ok(
            "grades.record",
            json!({
                "actor": actor(&curator, "teacher"),
                "assignmentId": a["assignmentId"],
                "studentId": s1,
                "value": value,
                "gradedAt": at
            }),
        );
    }

    for (hours, excused, date) in [(4, true, "2024-10-01"), (6, false, "2024-10-08")] {
        s.ok(
            "absences.record",
            json!({
                "actor": actor(&curator, "teacher"),
                "studentId": s1,
                "date": date,
                "hours": hours,
                "isExcused": excused
            }),
        );
    }
    let outsider_code = s.error_code(
        "absences.record",
        json!({
            "actor": actor(&outsider, "teacher"),
            "studentId": s2,
            "date": "2024-10-01",
            "hours": 2,
            "isExcused": false
        }),
    );
    assert_eq!(outsider_code, "forbidden");

    let report = s.ok(
        "reports.compose",
        json!({
            "actor": actor(&curator, "teacher"),
            "reportKind": "groupStatistics",
            "filters": { "groupId": group }
        }),
    );
    assert_eq!(report["studentCount"], json!(2));
    assert_eq!(report["studentsWithNoAbsences"], json!(1));
    assert_eq!(report["absences"]["totalHours"], json!(10));
    assert_eq!(report["absences"]["excusedHours"], json!(4));
    assert_eq!(report["absences"]["unexcusedHours"], json!(6));
    assert_eq!(report["averageAbsenceHoursPerStudent"].as_f64(), Some(5.0));
    assert_eq!(report["averageAbsenceHoursPerAbsentStudent"].as_f64(), Some(10.0));
    assert_eq!(report["grades"]["average"].as_f64(), Some(91.5));

    let windowed = s.ok(
        "reports.compose",
        json!({
            "actor": actor(&curator, "teacher"),
            "reportKind": "groupStatistics",
            "filters": { "groupId": group, "startDate": "2024-10-05", "endDate": "2024-10-31" }
        }),
    );
    assert_eq!(windowed["absences"]["totalHours"], json!(6));
    assert_eq!(windowed["grades"]["count"], json!(1));

    let outsider_report = s.error_code(
        "reports.compose",
        json!({
            "actor": actor(&outsider, "teacher"),
            "reportKind": "groupStatistics",
            "filters": { "groupId": group }
        }),
    );
    assert_eq!(outsider_report, "forbidden");
}

#[test]
fn recording_reports_missing_student_before_role() {
    let mut s = Sidecar::open("schoold-record-missing");
    let parent = create_user(&mut s, "parent", "Pam", "Parent");
    let student = create_user(&mut s, "student", "Sid", "Student");
    let group = create_group(&mut s, "8A");
    place(&mut s, &group, &student);

    for who in [actor(&parent, "parent"), actor(&student, "student")] {
        let missing = s.error_code(
            "absences.record",
            json!({
                "actor": who,
                "studentId": "does-not-exist",
                "date": "2024-10-01",
                "hours": 2,
                "isExcused": false
            }),
        );
        assert_eq!(missing, "not_found");

        let existing = s.error_code(
            "absences.record",
            json!({
                "actor": who,
                "studentId": student,
                "date": "2024-10-01",
                "hours": 2,
                "isExcused": false
            }),
        );
        assert_eq!(existing, "forbidden");
    }
}

#[test]
fn administrators_name_a_course_teacher_as_instructor() {
    let mut s = Sidecar::open("schoold-grade-instructor");
    let teacher = create_user(&mut s, "teacher", "Tom", "Teach");
    let stranger = create_user(&mut s, "teacher", "Sue", "Elsewhere");
    let student = create_user(&mut s, "student", "Ivy", "Pupil");
    let course = create_course(&mut s, "Geography", &teacher);
    enroll(&mut s, &course, &student);
    let assignment = s.ok(
        "assignments.create",
        json!({ "actor": admin(), "courseId": course, "title": "Maps" }),
    );
    let grade = |instructor: Option<&str>| {
        let mut params = json!({
            "actor": admin(),
            "assignmentId": assignment["assignmentId"],
            "studentId": student,
            "value": 77
        });
        if let Some(id) = instructor {
            params["instructorId"] = json!(id);
        }
        params
    };

    assert_eq!(s.error_code("grades.record", grade(None)), "bad_params");
    assert_eq!(s.error_code("grades.record", grade(Some(stranger.as_str()))), "bad_params");
    assert_eq!(s.error_code("grades.record", grade(Some("ghost"))), "not_found");

    let recorded = s.ok("grades.record", grade(Some(teacher.as_str())));
    assert_eq!(recorded["replaced"], json!(false));

    let impersonation = s.error_code(
        "grades.record",
        json!({
            "actor": actor(&teacher, "teacher"),
            "assignmentId": assignment["assignmentId"],
            "studentId": student,
            "value": 80,
            "instructorId": stranger
        }),
    );
    assert_eq!(impersonation, "forbidden");
}
