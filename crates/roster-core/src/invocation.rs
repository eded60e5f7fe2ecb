//! Synchronous invocation contract: JSON request in, `{statusCode, body}` out.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::{
    RosterClassroom, RosterStudent, RosterTeacher, SchoolRoster, StudentClassroomLink,
    TeacherClassroomLink, UpstreamSchool,
};
use crate::subject::LearningAreaKind;
use crate::sync::{SyncError, SyncReport, SyncService};
use crate::traits::RecordStore;

/// Body of a "save school" invocation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSchoolRequest {
    pub selected_school: UpstreamSchool,
    #[serde(default)]
    pub student_list: Vec<RosterStudent>,
    #[serde(default)]
    pub teacher_list: Vec<RosterTeacher>,
    #[serde(default)]
    pub unique_classroom_list: Vec<RequestClassroom>,
    #[serde(default)]
    pub student_classroom_list: Vec<StudentClassroomLink>,
    #[serde(default)]
    pub teacher_classroom_list: Vec<TeacherClassroomLink>,
}

/// Classroom entry of a save request. The learning area may be omitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestClassroom {
    #[serde(alias = "id")]
    pub upstream_id: String,
    #[serde(default, alias = "mis_id")]
    pub mis_id: Option<String>,
    #[serde(alias = "className")]
    pub name: String,
    #[serde(default)]
    pub school_year: Option<String>,
    #[serde(default)]
    pub learning_area: Option<LearningAreaKind>,
}

impl RequestClassroom {
    /// Classifies the class name. `None` for classrooms outside the core areas.
    pub fn into_classroom(self) -> Option<RosterClassroom> {
        let learning_area = LearningAreaKind::classify(&self.name)?;
        if let Some(supplied) = self.learning_area.filter(|area| *area != learning_area) {
            warn!(
                "Classroom {} sent as {} but its name classifies as {}",
                self.name, supplied, learning_area
            );
        }
        Some(RosterClassroom {
            upstream_id: self.upstream_id,
            mis_id: self.mis_id,
            name: self.name,
            school_year: self.school_year,
            learning_area,
        })
    }
}

impl SaveSchoolRequest {
    /// Splits the request into the school and a roster holding only core classrooms
    /// and the links that point at them.
    pub fn into_parts(self) -> (UpstreamSchool, SchoolRoster) {
        let mut classrooms = Vec::with_capacity(self.unique_classroom_list.len());
        for entry in self.unique_classroom_list {
            let name = entry.name.clone();
            match entry.into_classroom() {
                Some(classroom) => classrooms.push(classroom),
                None => debug!("Skipping non-core classroom {}", name),
            }
        }

        let kept: HashSet<&str> = classrooms.iter().map(|c| c.upstream_id.as_str()).collect();
        let student_classroom_links: Vec<StudentClassroomLink> = self
            .student_classroom_list
            .into_iter()
            .filter(|link| kept.contains(link.classroom_upstream_id.as_str()))
            .collect();
        let teacher_classroom_links: Vec<TeacherClassroomLink> = self
            .teacher_classroom_list
            .into_iter()
            .filter(|link| kept.contains(link.classroom_upstream_id.as_str()))
            .collect();

        let roster = SchoolRoster {
            students: self.student_list,
            teachers: self.teacher_list,
            classrooms,
            teacher_classroom_links,
            student_classroom_links,
            fetch_errors: Vec::new(),
        };
        (self.selected_school, roster)
    }
}

/// Response of a synchronous invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponse {
    pub status_code: u16,
    /// JSON-encoded payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failing pipeline stage, when the error came from a sync run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

impl InvocationResponse {
    /// 200 with `payload` JSON-encoded into `body`.
    pub fn ok<T: Serialize>(payload: &T) -> Self {
        match serde_json::to_string(payload) {
            Ok(body) => Self {
                status_code: 200,
                body: Some(body),
                error: None,
                stage: None,
            },
            Err(e) => Self::failure(&AppError::from(e)),
        }
    }

    pub fn failure(err: &AppError) -> Self {
        Self {
            status_code: 500,
            body: None,
            error: Some(err.to_string()),
            stage: None,
        }
    }

    pub fn from_sync(result: Result<SyncReport, SyncError>, school_name: &str) -> Self {
        match result {
            Ok(report) => Self::ok(&SavedSchool {
                message: format!("Successfully saved data for {}!", school_name),
                report,
            }),
            Err(err) => Self {
                status_code: 500,
                body: None,
                error: Some(err.message()),
                stage: Some(err.stage.to_string()),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}

#[derive(Serialize)]
struct SavedSchool {
    message: String,
    report: SyncReport,
}

/// Parses a save request and runs it through the sync pipeline.
pub async fn handle_save_request<S: RecordStore>(
    service: &SyncService<S>,
    body: &str,
) -> InvocationResponse {
    let request: SaveSchoolRequest = match serde_json::from_str(body) {
        Ok(request) => request,
        Err(e) => {
            return InvocationResponse::failure(&AppError::InvalidRequest(e.to_string()));
        }
    };

    let (school, roster) = request.into_parts();
    let result = service.sync_school(&school, &roster).await;
    InvocationResponse::from_sync(result, &school.name)
}
