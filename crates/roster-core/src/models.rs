//! Domain models: the normalized upstream roster and the rows persisted from it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::subject::LearningAreaKind;

// =============================================================================
// Tables and records
// =============================================================================

/// Every table the pipeline reads from or writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Table {
    School,
    Classroom,
    ClassroomYearLevel,
    ClassroomLearningArea,
    User,
    ClassroomTeacher,
    Student,
    SchoolStudent,
    ClassroomStudent,
    Country,
    State,
    LearningArea,
    YearLevel,
}

impl Table {
    pub const ALL: [Table; 13] = [
        Table::School,
        Table::Classroom,
        Table::ClassroomYearLevel,
        Table::ClassroomLearningArea,
        Table::User,
        Table::ClassroomTeacher,
        Table::Student,
        Table::SchoolStudent,
        Table::ClassroomStudent,
        Table::Country,
        Table::State,
        Table::LearningArea,
        Table::YearLevel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::School => "School",
            Table::Classroom => "Classroom",
            Table::ClassroomYearLevel => "ClassroomYearLevel",
            Table::ClassroomLearningArea => "ClassroomLearningArea",
            Table::User => "User",
            Table::ClassroomTeacher => "ClassroomTeacher",
            Table::Student => "Student",
            Table::SchoolStudent => "SchoolStudent",
            Table::ClassroomStudent => "ClassroomStudent",
            Table::Country => "Country",
            Table::State => "State",
            Table::LearningArea => "LearningArea",
            Table::YearLevel => "YearLevel",
        }
    }

    /// Lookup tables are read-only for the sync pipeline.
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            Table::Country | Table::State | Table::LearningArea | Table::YearLevel
        )
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored item: primary key, optional upstream id (secondary index), and the item body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub upstream_id: Option<String>,
    pub item: serde_json::Value,
}

/// A row type that can be written to one table of the record store.
pub trait Entity: Serialize {
    const TABLE: Table;

    /// Local primary key.
    fn id(&self) -> &str;

    /// Upstream id, indexed for existence checks.
    fn upstream_id(&self) -> Option<&str> {
        None
    }

    fn to_record(&self) -> Result<Record, AppError> {
        Ok(Record {
            id: self.id().to_string(),
            upstream_id: self.upstream_id().map(str::to_string),
            item: serde_json::to_value(self)?,
        })
    }
}

/// Generates a fresh local identifier.
pub fn new_local_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Marker written in place of a foreign key whose classroom (or person) could not be translated.
pub const MISSING_MARKER: &str = "missing";

/// State id written on every school: the upstream API carries no state.
pub const NO_STATE_MARKER: &str = "Wonde has no states";

/// Marker written in place of an unresolved lookup id, e.g. `"Narnia not in list"`.
pub fn not_in_list(name: &str) -> String {
    format!("{} not in list", name)
}

// =============================================================================
// Normalized upstream roster
// =============================================================================

/// A school as listed by the upstream API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamSchool {
    #[serde(alias = "wondeID")]
    pub upstream_id: String,
    #[serde(alias = "schoolName")]
    pub name: String,
    #[serde(default)]
    pub urn: Option<i64>,
    #[serde(default)]
    pub address1: Option<String>,
    #[serde(default)]
    pub address2: Option<String>,
    #[serde(default)]
    pub town: Option<String>,
    #[serde(default)]
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStudent {
    #[serde(alias = "wondeStudentId", alias = "id")]
    pub upstream_id: String,
    #[serde(default, alias = "mis_id")]
    pub mis_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub gender: Option<String>,
    /// Rendered as `DD Mon YYYY`.
    #[serde(default)]
    pub dob: Option<String>,
    #[serde(alias = "year")]
    pub year_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterTeacher {
    #[serde(alias = "wondeTeacherId", alias = "id")]
    pub upstream_id: String,
    #[serde(default, alias = "mis_id")]
    pub mis_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterClassroom {
    #[serde(alias = "id")]
    pub upstream_id: String,
    #[serde(default, alias = "mis_id")]
    pub mis_id: Option<String>,
    #[serde(alias = "className")]
    pub name: String,
    /// Year code of the first student seen in the class, if any.
    #[serde(default)]
    pub school_year: Option<String>,
    pub learning_area: LearningAreaKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentClassroomLink {
    #[serde(alias = "wondeStudentId")]
    pub student_upstream_id: String,
    #[serde(alias = "wondeClassroomId")]
    pub classroom_upstream_id: String,
    #[serde(alias = "classroomName")]
    pub classroom_name: String,
    #[serde(alias = "yearLevel")]
    pub year_code: String,
    #[serde(alias = "classroomLearningArea")]
    pub learning_area: LearningAreaKind,
    /// First listed teacher of the class.
    #[serde(default, alias = "teacherId")]
    pub teacher_upstream_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherClassroomLink {
    #[serde(alias = "wondeTeacherId")]
    pub teacher_upstream_id: String,
    #[serde(alias = "wondeClassroomId")]
    pub classroom_upstream_id: String,
    #[serde(alias = "classroomName")]
    pub classroom_name: String,
    #[serde(alias = "classroomLearningArea")]
    pub learning_area: LearningAreaKind,
}

/// Filtered roster of one school: core-subject classrooms and the people attached to them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolRoster {
    pub students: Vec<RosterStudent>,
    pub teachers: Vec<RosterTeacher>,
    pub classrooms: Vec<RosterClassroom>,
    pub teacher_classroom_links: Vec<TeacherClassroomLink>,
    pub student_classroom_links: Vec<StudentClassroomLink>,
    /// Upstream errors that cut pagination short. Non-empty means the roster may be truncated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fetch_errors: Vec<String>,
}

impl SchoolRoster {
    pub fn is_complete(&self) -> bool {
        self.fetch_errors.is_empty()
    }
}

// =============================================================================
// Persisted rows
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolRow {
    pub id: String,
    pub upstream_id: String,
    pub school_name: String,
    pub address: Option<String>,
    pub town: Option<String>,
    pub country: String,
    /// Country lookup id, or a `"<name> not in list"` marker.
    pub country_id: String,
    /// Always [`NO_STATE_MARKER`].
    pub state_id: String,
    pub student_login_enabled: bool,
}

impl Entity for SchoolRow {
    const TABLE: Table = Table::School;

    fn id(&self) -> &str {
        &self.id
    }

    fn upstream_id(&self) -> Option<&str> {
        Some(&self.upstream_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomRow {
    pub id: String,
    pub upstream_id: String,
    pub mis_id: Option<String>,
    pub class_type: String,
    pub class_name: String,
    pub school_id: String,
    pub school_year: Option<String>,
}

impl Entity for ClassroomRow {
    const TABLE: Table = Table::Classroom;

    fn id(&self) -> &str {
        &self.id
    }

    fn upstream_id(&self) -> Option<&str> {
        Some(&self.upstream_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomYearLevelRow {
    pub id: String,
    pub classroom_id: String,
    pub school_id: String,
    pub year_level_id: String,
}

impl Entity for ClassroomYearLevelRow {
    const TABLE: Table = Table::ClassroomYearLevel;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomLearningAreaRow {
    pub id: String,
    pub classroom_id: String,
    pub learning_area_id: String,
}

impl Entity for ClassroomLearningAreaRow {
    const TABLE: Table = Table::ClassroomLearningArea;

    fn id(&self) -> &str {
        &self.id
    }
}

/// A teacher, stored in the `User` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: String,
    pub upstream_id: String,
    pub title: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub user_group: String,
    pub user_type: String,
    pub user_school_id: String,
}

impl Entity for UserRow {
    const TABLE: Table = Table::User;

    fn id(&self) -> &str {
        &self.id
    }

    fn upstream_id(&self) -> Option<&str> {
        Some(&self.upstream_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomTeacherRow {
    pub id: String,
    pub classroom_id: String,
    pub teacher_id: String,
    pub email: String,
}

impl Entity for ClassroomTeacherRow {
    const TABLE: Table = Table::ClassroomTeacher;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub upstream_id: String,
    pub mis_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub gender: Option<String>,
    pub birth_date: Option<String>,
    pub year_code: String,
    pub year_level_id: String,
}

impl Entity for StudentRow {
    const TABLE: Table = Table::Student;

    fn id(&self) -> &str {
        &self.id
    }

    fn upstream_id(&self) -> Option<&str> {
        Some(&self.upstream_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolStudentRow {
    pub id: String,
    pub school_id: String,
    pub student_id: String,
    pub school_year: i32,
    pub year_level_id: String,
}

impl Entity for SchoolStudentRow {
    const TABLE: Table = Table::SchoolStudent;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomStudentRow {
    pub id: String,
    pub classroom_id: String,
    pub student_id: String,
}

impl Entity for ClassroomStudentRow {
    const TABLE: Table = Table::ClassroomStudent;

    fn id(&self) -> &str {
        &self.id
    }
}

// =============================================================================
// Lookup rows
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountryRow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub country_code: Option<String>,
}

impl Entity for CountryRow {
    const TABLE: Table = Table::Country;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub state_code: Option<String>,
    #[serde(default, alias = "countryID")]
    pub country_id: Option<String>,
}

impl Entity for StateRow {
    const TABLE: Table = Table::State;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningAreaRow {
    pub id: String,
    pub area_name: String,
    #[serde(default)]
    pub colour: Option<String>,
}

impl Entity for LearningAreaRow {
    const TABLE: Table = Table::LearningArea;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearLevelRow {
    pub id: String,
    /// `Y<code>`, e.g. `Y6`.
    pub year_code: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Entity for YearLevelRow {
    const TABLE: Table = Table::YearLevel;

    fn id(&self) -> &str {
        &self.id
    }
}
