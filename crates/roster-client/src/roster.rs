//! Filtering and normalization of upstream pages into a [`SchoolRoster`].

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use roster_core::models::{
    RosterClassroom, RosterStudent, RosterTeacher, SchoolRoster, StudentClassroomLink,
    TeacherClassroomLink,
};
use roster_core::subject::{is_enrolled_year, year_sort_key, LearningAreaKind};
use tracing::debug;

use crate::wonde::{WondeClass, WondeEmployee, WondeStudent};

/// Accumulates upstream students and employees, keeping only core-subject data.
///
/// - A student is kept if they attend at least one core-subject class and
///   their year code is not the "not enrolled" code.
/// - A teacher is kept if they teach at least one core-subject class.
/// - Each classroom appears once, however many people reference it.
#[derive(Debug, Default)]
pub struct RosterBuilder {
    students: Vec<RosterStudent>,
    teachers: Vec<RosterTeacher>,
    classrooms: Vec<RosterClassroom>,
    classroom_index: HashMap<String, usize>,
    student_links: Vec<StudentClassroomLink>,
    teacher_links: Vec<TeacherClassroomLink>,
    fetch_errors: Vec<String>,
}

impl RosterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert_classroom(
        &mut self,
        class: &WondeClass,
        area: LearningAreaKind,
        school_year: Option<&str>,
    ) {
        match self.classroom_index.get(&class.id) {
            Some(&index) => {
                let existing = &mut self.classrooms[index];
                if existing.school_year.is_none() {
                    existing.school_year = school_year.map(str::to_string);
                }
            }
            None => {
                self.classroom_index
                    .insert(class.id.clone(), self.classrooms.len());
                self.classrooms.push(RosterClassroom {
                    upstream_id: class.id.clone(),
                    mis_id: class.mis_id.clone(),
                    name: class.name.clone(),
                    school_year: school_year.map(str::to_string),
                    learning_area: area,
                });
            }
        }
    }

    pub fn add_student(&mut self, student: WondeStudent) {
        let year_code = match student.year_code() {
            Some(code) => code.to_string(),
            None => {
                debug!("Skipping student {}: no year code", student.id);
                return;
            }
        };
        if !is_enrolled_year(&year_code) {
            debug!("Skipping student {}: not enrolled", student.id);
            return;
        }

        let mut core = false;
        for class in student.classes.items() {
            let Some(area) = LearningAreaKind::classify(&class.name) else {
                continue;
            };
            core = true;
            self.upsert_classroom(class, area, Some(&year_code));
            self.student_links.push(StudentClassroomLink {
                student_upstream_id: student.id.clone(),
                classroom_upstream_id: class.id.clone(),
                classroom_name: class.name.clone(),
                year_code: year_code.clone(),
                learning_area: area,
                teacher_upstream_id: class.employees.items().first().map(|e| e.id.clone()),
            });
        }

        if core {
            self.students.push(RosterStudent {
                dob: student
                    .date_of_birth
                    .as_ref()
                    .map(|d| format_dob(&d.date)),
                upstream_id: student.id,
                mis_id: student.mis_id,
                first_name: student.forename,
                last_name: student.surname,
                gender: student.gender,
                year_code,
            });
        }
    }

    pub fn add_employee(&mut self, employee: WondeEmployee) {
        let mut core = false;
        for class in employee.classes.items() {
            let Some(area) = LearningAreaKind::classify(&class.name) else {
                continue;
            };
            core = true;
            self.upsert_classroom(class, area, None);
            self.teacher_links.push(TeacherClassroomLink {
                teacher_upstream_id: employee.id.clone(),
                classroom_upstream_id: class.id.clone(),
                classroom_name: class.name.clone(),
                learning_area: area,
            });
        }

        if core {
            self.teachers.push(RosterTeacher {
                email: employee.email().map(str::to_string),
                upstream_id: employee.id,
                mis_id: employee.mis_id,
                title: employee.title,
                first_name: employee.forename,
                last_name: employee.surname,
            });
        }
    }

    /// Notes an upstream failure that ended pagination early.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.fetch_errors.push(message.into());
    }

    /// Finishes the roster, sorting students by numeric year code.
    pub fn build(mut self) -> SchoolRoster {
        self.students
            .sort_by_key(|s| year_sort_key(&s.year_code));
        SchoolRoster {
            students: self.students,
            teachers: self.teachers,
            classrooms: self.classrooms,
            teacher_classroom_links: self.teacher_links,
            student_classroom_links: self.student_links,
            fetch_errors: self.fetch_errors,
        }
    }
}

/// Renders an upstream date of birth as `DD Mon YYYY`.
///
/// Unparseable values are passed through unchanged.
pub fn format_dob(raw: &str) -> String {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return dt.format("%d %b %Y").to_string();
    }
    if let Some(Ok(date)) = raw.get(..10).map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d")) {
        return date.format("%d %b %Y").to_string();
    }
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::{InMemoryStore, SyncConfig, SyncService, Table, UpstreamSchool};
    use serde_json::json;

    fn student(id: &str, year: &str, classes: &[(&str, &str)]) -> WondeStudent {
        let classes: Vec<_> = classes
            .iter()
            .map(|(cid, name)| {
                json!({
                    "id": cid,
                    "mis_id": format!("mis-{}", cid),
                    "name": name,
                    "employees": { "data": [{ "id": "T1" }] }
                })
            })
            .collect();
        serde_json::from_value(json!({
            "id": id,
            "mis_id": format!("mis-{}", id),
            "forename": "Rhyett",
            "surname": "Burrell",
            "gender": "MALE",
            "date_of_birth": { "date": "2015-07-20 00:00:00.000000" },
            "year": { "data": { "code": year } },
            "classes": { "data": classes }
        }))
        .unwrap()
    }

    fn employee(id: &str, email: Option<&str>, classes: &[(&str, &str)]) -> WondeEmployee {
        let classes: Vec<_> = classes
            .iter()
            .map(|(cid, name)| json!({ "id": cid, "name": name }))
            .collect();
        serde_json::from_value(json!({
            "id": id,
            "title": "Ms",
            "forename": "Lab60",
            "surname": "Sixty",
            "contact_details": { "data": { "emails": { "email": email } } },
            "classes": { "data": classes }
        }))
        .unwrap()
    }

    #[test]
    fn test_student_kept_with_core_link_only() {
        let mut builder = RosterBuilder::new();
        builder.add_student(student("S1", "7", &[("C1", "Math 7"), ("C2", "Art 7")]));
        let roster = builder.build();

        assert_eq!(roster.students.len(), 1);
        assert_eq!(roster.student_classroom_links.len(), 1);
        assert_eq!(roster.student_classroom_links[0].classroom_name, "Math 7");
        assert_eq!(
            roster.student_classroom_links[0].teacher_upstream_id.as_deref(),
            Some("T1")
        );
        assert_eq!(roster.classrooms.len(), 1);
        assert_eq!(roster.classrooms[0].school_year.as_deref(), Some("7"));
        assert_eq!(roster.students[0].dob.as_deref(), Some("20 Jul 2015"));
    }

    #[test]
    fn test_student_without_core_class_excluded() {
        let mut builder = RosterBuilder::new();
        builder.add_student(student("S1", "7", &[("C2", "Art 7")]));
        let roster = builder.build();
        assert!(roster.students.is_empty());
        assert!(roster.student_classroom_links.is_empty());
        assert!(roster.classrooms.is_empty());
    }

    #[test]
    fn test_not_enrolled_year_excluded() {
        let mut builder = RosterBuilder::new();
        builder.add_student(student("S1", "40", &[("C1", "Math 7")]));
        let roster = builder.build();
        assert!(roster.students.is_empty());
        assert!(roster.classrooms.is_empty());
    }

    #[test]
    fn test_classrooms_deduplicated_across_people() {
        let mut builder = RosterBuilder::new();
        builder.add_employee(employee("T1", None, &[("C1", "Math 7")]));
        builder.add_student(student("S1", "7", &[("C1", "Math 7")]));
        builder.add_student(student("S2", "7", &[("C1", "Math 7"), ("C3", "Science 7")]));
        let roster = builder.build();

        assert_eq!(roster.classrooms.len(), 2);
        assert_eq!(roster.student_classroom_links.len(), 3);
        assert_eq!(roster.teacher_classroom_links.len(), 1);
        // First seen via the teacher (no year), then filled from a student.
        assert_eq!(roster.classrooms[0].school_year.as_deref(), Some("7"));
    }

    #[test]
    fn test_teacher_filtering_and_email() {
        let mut builder = RosterBuilder::new();
        builder.add_employee(employee("T1", Some("a@school.edu"), &[("C1", "IT Applications 9")]));
        builder.add_employee(employee("T2", None, &[("C9", "Homeroom 3")]));
        let roster = builder.build();

        assert_eq!(roster.teachers.len(), 1);
        assert_eq!(roster.teachers[0].email.as_deref(), Some("a@school.edu"));
        assert_eq!(
            roster.teacher_classroom_links[0].learning_area,
            LearningAreaKind::Technology
        );
    }

    #[test]
    fn test_end_to_end_filtering() {
        let mut builder = RosterBuilder::new();
        builder.add_student(student("S1", "7", &[("C1", "Math 7"), ("C2", "Drama 7")]));
        builder.add_student(student("S2", "7", &[("C1", "Math 7")]));
        builder.add_student(student("S3", "40", &[("C1", "Math 7")]));
        builder.add_employee(employee("T1", Some("t@x.com"), &[("C1", "Math 7")]));
        let roster = builder.build();

        assert_eq!(roster.students.len(), 2);
        assert_eq!(roster.classrooms.len(), 1);
        assert_eq!(roster.classrooms[0].name, "Math 7");
        assert_eq!(roster.student_classroom_links.len(), 2);
        assert_eq!(roster.teacher_classroom_links.len(), 1);
        assert!(roster.is_complete());
    }

    #[test]
    fn test_students_sorted_by_numeric_year() {
        let mut builder = RosterBuilder::new();
        builder.add_student(student("S10", "10", &[("C1", "Math")]));
        builder.add_student(student("S2", "2", &[("C1", "Math")]));
        builder.add_student(student("S9", "9", &[("C1", "Math")]));
        let roster = builder.build();
        let years: Vec<_> = roster.students.iter().map(|s| s.year_code.as_str()).collect();
        assert_eq!(years, vec!["2", "9", "10"]);
    }

    #[test]
    fn test_format_dob() {
        assert_eq!(format_dob("2015-07-20 00:00:00.000000"), "20 Jul 2015");
        assert_eq!(format_dob("2015-07-20"), "20 Jul 2015");
        assert_eq!(format_dob("unknown"), "unknown");
    }

    #[tokio::test]
    async fn test_built_roster_syncs_into_store() {
        let mut builder = RosterBuilder::new();
        builder.add_student(student("S1", "7", &[("C1", "Math 7"), ("C2", "Drama 7")]));
        builder.add_student(student("S2", "7", &[("C1", "Math 7")]));
        builder.add_student(student("S3", "40", &[("C1", "Math 7")]));
        builder.add_employee(employee(
            "T1",
            Some("teacher@example.com"),
            &[("C1", "Math 7"), ("C2", "Drama 7")],
        ));
        let roster = builder.build();

        let school: UpstreamSchool = serde_json::from_value(json!({
            "upstreamId": "A5960542",
            "name": "Wonde ANZ Testing School"
        }))
        .unwrap();
        let service = SyncService::new(InMemoryStore::new(), SyncConfig::default());
        let report = service.sync_school(&school, &roster).await.unwrap();

        let store = service.store();
        assert_eq!(store.count(Table::School), 1);
        assert_eq!(store.count(Table::Classroom), 1);
        assert_eq!(store.count(Table::Student), 2);
        assert_eq!(store.count(Table::ClassroomStudent), 2);
        assert_eq!(store.count(Table::ClassroomTeacher), 1);
        assert_eq!(report.missing_links, 0);
        assert!(report.roster_complete);
    }
}
