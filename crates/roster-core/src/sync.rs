//! Sync Orchestrator.
//!
//! Runs the stages of one school sync strictly in order, each consuming ids
//! minted by the one before:
//!
//! ```text
//! ResolveSchool → ReadLookups → PersistClassrooms → PersistTeachers → PersistStudents
//! ```
//!
//! The first failing stage ends the run. Nothing already written is rolled
//! back. Unresolvable foreign keys are soft failures: the row is written with
//! a marker and the run continues.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{Datelike, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::batch::{batch_persist, BatchOutcome};
use crate::config::SyncConfig;
use crate::error::AppError;
use crate::lookup::{load_lookups, LookupTables};
use crate::models::{
    new_local_id, ClassroomLearningAreaRow, ClassroomRow, ClassroomStudentRow,
    ClassroomTeacherRow, ClassroomYearLevelRow, Entity, SchoolRoster, SchoolStudentRow,
    StudentRow, Table, UpstreamSchool, UserRow, MISSING_MARKER,
};
use crate::resolver::{resolve_people, resolve_school, IdMap, PeopleIds};
use crate::traits::RecordStore;

/// A stage of the sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    ResolveSchool,
    ReadLookups,
    PersistClassrooms,
    PersistTeachers,
    PersistStudents,
}

impl SyncStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStage::ResolveSchool => "resolve_school",
            SyncStage::ReadLookups => "read_lookups",
            SyncStage::PersistClassrooms => "persist_classrooms",
            SyncStage::PersistTeachers => "persist_teachers",
            SyncStage::PersistStudents => "persist_students",
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The first failure of a sync run, tagged with its stage.
#[derive(Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct SyncError {
    pub stage: SyncStage,
    #[source]
    pub source: AppError,
}

impl SyncError {
    /// The stage's error message, unchanged.
    pub fn message(&self) -> String {
        self.source.to_string()
    }
}

trait StageExt<T> {
    fn at(self, stage: SyncStage) -> Result<T, SyncError>;
}

impl<T> StageExt<T> for Result<T, AppError> {
    fn at(self, stage: SyncStage) -> Result<T, SyncError> {
        self.map_err(|source| {
            error!("Sync failed at {}: {}", stage, source);
            SyncError { stage, source }
        })
    }
}

/// Summary of a successful sync run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub school_id: String,
    pub school_upstream_id: String,
    pub school_is_new: bool,
    /// One outcome per entity table, in write order.
    pub outcomes: Vec<BatchOutcome>,
    /// Link rows written with a `"missing"` foreign key.
    pub missing_links: usize,
    /// Students and teachers matched to rows from earlier runs.
    pub reused_people: usize,
    /// False when the roster fetch was cut short upstream.
    pub roster_complete: bool,
}

impl SyncReport {
    /// Records written to `table` during this run.
    pub fn written(&self, table: Table) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.table == table)
            .map(|o| o.succeeded)
            .sum()
    }

    pub fn total_written(&self) -> usize {
        self.outcomes.iter().map(|o| o.succeeded).sum()
    }
}

/// Rows derived for one stage, plus how many foreign keys fell back to a marker.
struct StageRows<A, B, C = ()> {
    primary: Vec<A>,
    secondary: Vec<B>,
    links: Vec<C>,
    missing: usize,
}

/// Runs school syncs against a record store.
///
/// # Example
///
/// ```no_run
/// use roster_core::{InMemoryStore, SyncConfig, SyncService};
/// use roster_core::models::{SchoolRoster, UpstreamSchool};
///
/// # async fn example(school: UpstreamSchool, roster: SchoolRoster) {
/// let service = SyncService::new(InMemoryStore::new(), SyncConfig::default());
/// match service.sync_school(&school, &roster).await {
///     Ok(report) => println!("{} records written", report.total_written()),
///     Err(e) => eprintln!("{} failed: {}", e.stage, e.message()),
/// }
/// # }
/// ```
pub struct SyncService<S: RecordStore> {
    store: S,
    config: SyncConfig,
}

impl<S: RecordStore> SyncService<S> {
    pub fn new(store: S, config: SyncConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Syncs one school's filtered roster into the store.
    pub async fn sync_school(
        &self,
        school: &UpstreamSchool,
        roster: &SchoolRoster,
    ) -> Result<SyncReport, SyncError> {
        info!(
            "Starting sync for {} ({}): {} classrooms, {} teachers, {} students",
            school.name,
            school.upstream_id,
            roster.classrooms.len(),
            roster.teachers.len(),
            roster.students.len()
        );
        if !roster.is_complete() {
            info!(
                "Roster for {} is incomplete ({} fetch errors), syncing what was fetched",
                school.upstream_id,
                roster.fetch_errors.len()
            );
        }

        info!("Stage {}", SyncStage::ResolveSchool);
        let resolution = resolve_school(&self.store, school)
            .await
            .at(SyncStage::ResolveSchool)?;
        let school_id = resolution.local_id.clone();

        info!("Stage {}", SyncStage::ReadLookups);
        let lookups = load_lookups(&self.store)
            .await
            .at(SyncStage::ReadLookups)?;

        let mut report = SyncReport {
            school_id: school_id.clone(),
            school_upstream_id: school.upstream_id.clone(),
            school_is_new: resolution.is_new,
            outcomes: Vec::new(),
            missing_links: 0,
            reused_people: 0,
            roster_complete: roster.is_complete(),
        };

        info!("Stage {}", SyncStage::PersistClassrooms);
        let classroom_ids = self
            .persist_classrooms(&school_id, roster, &lookups, &mut report)
            .await
            .at(SyncStage::PersistClassrooms)?;

        info!("Stage {}", SyncStage::PersistTeachers);
        self.persist_teachers(&school_id, roster, &classroom_ids, &mut report)
            .await
            .at(SyncStage::PersistTeachers)?;

        info!("Stage {}", SyncStage::PersistStudents);
        self.persist_students(&school_id, roster, &classroom_ids, &lookups, &mut report)
            .await
            .at(SyncStage::PersistStudents)?;

        info!(
            "Sync complete for {}: {} records written, {} missing links",
            school.upstream_id,
            report.total_written(),
            report.missing_links
        );
        Ok(report)
    }

    async fn persist<T: Entity>(
        &self,
        rows: &[T],
        report: &mut SyncReport,
    ) -> Result<(), AppError> {
        let outcome = batch_persist(&self.store, rows, self.config.effective_batch_size()).await;
        report.outcomes.push(outcome.clone());
        outcome.into_result().map(|_| ())
    }

    async fn persist_classrooms(
        &self,
        school_id: &str,
        roster: &SchoolRoster,
        lookups: &LookupTables,
        report: &mut SyncReport,
    ) -> Result<IdMap, AppError> {
        let classroom_ids = IdMap::mint(
            "Classroom",
            roster.classrooms.iter().map(|c| c.upstream_id.as_str()),
        );
        let rows = classroom_rows(school_id, roster, &classroom_ids, lookups);
        report.missing_links += rows.missing;

        self.persist(&rows.primary, report).await?;
        self.persist(&rows.secondary, report).await?;
        self.persist(&rows.links, report).await?;
        Ok(classroom_ids)
    }

    async fn persist_teachers(
        &self,
        school_id: &str,
        roster: &SchoolRoster,
        classroom_ids: &IdMap,
        report: &mut SyncReport,
    ) -> Result<(), AppError> {
        let teachers = resolve_people(
            &self.store,
            Table::User,
            roster.teachers.iter().map(|t| t.upstream_id.as_str()),
            self.config.skip_existing_people,
        )
        .await?;
        report.reused_people += teachers.existing.len();

        let rows = teacher_rows(school_id, roster, classroom_ids, &teachers);
        report.missing_links += rows.missing;

        self.persist(&rows.primary, report).await?;
        self.persist(&rows.secondary, report).await
    }

    async fn persist_students(
        &self,
        school_id: &str,
        roster: &SchoolRoster,
        classroom_ids: &IdMap,
        lookups: &LookupTables,
        report: &mut SyncReport,
    ) -> Result<(), AppError> {
        let students = resolve_people(
            &self.store,
            Table::Student,
            roster.students.iter().map(|s| s.upstream_id.as_str()),
            self.config.skip_existing_people,
        )
        .await?;
        report.reused_people += students.existing.len();

        let rows = student_rows(school_id, roster, classroom_ids, &students, lookups);
        report.missing_links += rows.missing;

        self.persist(&rows.primary, report).await?;
        self.persist(&rows.secondary, report).await?;
        self.persist(&rows.links, report).await
    }
}

fn classroom_rows(
    school_id: &str,
    roster: &SchoolRoster,
    classroom_ids: &IdMap,
    lookups: &LookupTables,
) -> StageRows<ClassroomRow, ClassroomYearLevelRow, ClassroomLearningAreaRow> {
    let mut rows = StageRows {
        primary: Vec::new(),
        secondary: Vec::new(),
        links: Vec::new(),
        missing: 0,
    };
    let mut seen = HashSet::new();

    for classroom in &roster.classrooms {
        if !seen.insert(classroom.upstream_id.as_str()) {
            continue;
        }
        let classroom_id = classroom_ids.resolve_or_missing(&classroom.upstream_id);

        rows.primary.push(ClassroomRow {
            id: classroom_id.clone(),
            upstream_id: classroom.upstream_id.clone(),
            mis_id: classroom.mis_id.clone(),
            class_type: "Classroom".to_string(),
            class_name: classroom.name.clone(),
            school_id: school_id.to_string(),
            school_year: classroom.school_year.clone(),
        });

        let year_level_id = match &classroom.school_year {
            Some(code) => lookups.year_level_id_or_marker(code),
            None => {
                rows.missing += 1;
                MISSING_MARKER.to_string()
            }
        };
        rows.secondary.push(ClassroomYearLevelRow {
            id: new_local_id(),
            classroom_id: classroom_id.clone(),
            school_id: school_id.to_string(),
            year_level_id,
        });

        rows.links.push(ClassroomLearningAreaRow {
            id: new_local_id(),
            classroom_id,
            learning_area_id: lookups.learning_area_id_or_marker(classroom.learning_area),
        });
    }
    rows
}

/// Placeholder email for a teacher the upstream API has none for.
pub fn placeholder_email(local_id: &str) -> String {
    format!("{}@notsupplied.com", local_id)
}

fn teacher_rows(
    school_id: &str,
    roster: &SchoolRoster,
    classroom_ids: &IdMap,
    teachers: &PeopleIds,
) -> StageRows<UserRow, ClassroomTeacherRow> {
    let mut rows = StageRows {
        primary: Vec::new(),
        secondary: Vec::new(),
        links: Vec::new(),
        missing: 0,
    };
    let mut emails: HashMap<&str, String> = HashMap::new();

    for teacher in &roster.teachers {
        let local_id = teachers.ids.resolve_or_missing(&teacher.upstream_id);
        let email = match teacher.email.as_deref().map(str::trim) {
            Some(email) if !email.is_empty() => email.to_string(),
            _ => {
                info!(
                    "Teacher {} has no email, using placeholder",
                    teacher.upstream_id
                );
                placeholder_email(&local_id)
            }
        };
        emails.insert(teacher.upstream_id.as_str(), email.clone());

        if teachers.existing.contains(&teacher.upstream_id)
            || rows.primary.iter().any(|r: &UserRow| r.id == local_id)
        {
            continue;
        }
        rows.primary.push(UserRow {
            id: local_id,
            upstream_id: teacher.upstream_id.clone(),
            title: teacher.title.clone(),
            first_name: teacher.first_name.clone(),
            last_name: teacher.last_name.clone(),
            email,
            user_group: "Users".to_string(),
            user_type: "Educator".to_string(),
            user_school_id: school_id.to_string(),
        });
    }

    let mut seen = HashSet::new();
    for link in &roster.teacher_classroom_links {
        if !seen.insert((
            link.teacher_upstream_id.as_str(),
            link.classroom_upstream_id.as_str(),
        )) {
            continue;
        }
        let classroom_id = classroom_ids.resolve_or_missing(&link.classroom_upstream_id);
        let teacher_id = teachers.ids.resolve_or_missing(&link.teacher_upstream_id);
        if classroom_id == MISSING_MARKER || teacher_id == MISSING_MARKER {
            rows.missing += 1;
        }
        let email = emails
            .get(link.teacher_upstream_id.as_str())
            .cloned()
            .unwrap_or_else(|| MISSING_MARKER.to_string());

        rows.secondary.push(ClassroomTeacherRow {
            id: new_local_id(),
            classroom_id,
            teacher_id,
            email,
        });
    }
    rows
}

fn student_rows(
    school_id: &str,
    roster: &SchoolRoster,
    classroom_ids: &IdMap,
    students: &PeopleIds,
    lookups: &LookupTables,
) -> StageRows<StudentRow, SchoolStudentRow, ClassroomStudentRow> {
    let mut rows = StageRows {
        primary: Vec::new(),
        secondary: Vec::new(),
        links: Vec::new(),
        missing: 0,
    };
    let school_year = Utc::now().year();
    let mut written = HashSet::new();

    for student in &roster.students {
        if students.existing.contains(&student.upstream_id)
            || !written.insert(student.upstream_id.as_str())
        {
            continue;
        }
        let local_id = students.ids.resolve_or_missing(&student.upstream_id);
        let year_level_id = lookups.year_level_id_or_marker(&student.year_code);

        rows.primary.push(StudentRow {
            id: local_id.clone(),
            upstream_id: student.upstream_id.clone(),
            mis_id: student.mis_id.clone(),
            first_name: student.first_name.clone(),
            last_name: student.last_name.clone(),
            gender: student.gender.clone(),
            birth_date: student.dob.clone(),
            year_code: student.year_code.clone(),
            year_level_id: year_level_id.clone(),
        });
        rows.secondary.push(SchoolStudentRow {
            id: new_local_id(),
            school_id: school_id.to_string(),
            student_id: local_id,
            school_year,
            year_level_id,
        });
    }

    let mut seen = HashSet::new();
    for link in &roster.student_classroom_links {
        if !seen.insert((
            link.student_upstream_id.as_str(),
            link.classroom_upstream_id.as_str(),
        )) {
            continue;
        }
        let classroom_id = classroom_ids.resolve_or_missing(&link.classroom_upstream_id);
        let student_id = students.ids.resolve_or_missing(&link.student_upstream_id);
        if classroom_id == MISSING_MARKER || student_id == MISSING_MARKER {
            rows.missing += 1;
        }
        rows.links.push(ClassroomStudentRow {
            id: new_local_id(),
            classroom_id,
            student_id,
        });
    }
    rows
}
