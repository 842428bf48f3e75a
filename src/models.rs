use serde::Serialize;

pub type UserId = i64;
pub type CourseId = i64;
pub type ContextId = i64;
pub type GroupId = i64;

#[derive(Debug, Clone)]
pub struct Course {
    pub id: CourseId,
    pub shortname: String,
    pub fullname: String,
    pub visible: bool,
}

/// The course-module record shared by every activity instance.
#[derive(Debug, Clone)]
pub struct CourseModule {
    pub id: i64,
    pub context_id: ContextId,
    pub visible: bool,
    pub availability: Option<String>,
    pub group_mode: GroupMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMode {
    None,
    Separate,
    Visible,
}

impl GroupMode {
    pub fn from_db(value: i32) -> Self {
        match value {
            1 => GroupMode::Separate,
            2 => GroupMode::Visible,
            _ => GroupMode::None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Forum {
    pub id: i64,
    pub course: CourseId,
    pub name: String,
    pub cm: CourseModule,
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub id: i64,
    pub course: CourseId,
    pub name: String,
    pub cm: CourseModule,
    pub allow_submissions_from: i64,
    pub due_date: i64,
    pub cutoff_date: i64,
    pub team_submission: bool,
}

#[derive(Debug, Clone)]
pub struct Quiz {
    pub id: i64,
    pub course: CourseId,
    pub name: String,
    pub cm: CourseModule,
    pub time_open: i64,
    pub time_close: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    New,
    Draft,
    Submitted,
    Reopened,
}

impl SubmissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::New => "new",
            SubmissionStatus::Draft => "draft",
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::Reopened => "reopened",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "draft" => SubmissionStatus::Draft,
            "submitted" => SubmissionStatus::Submitted,
            "reopened" => SubmissionStatus::Reopened,
            _ => SubmissionStatus::New,
        }
    }
}

/// A latest submission joined with the grade for the same attempt, if any.
///
/// Team submissions arrive once per member of the submitting group, with
/// `user_id` set to that member.
#[derive(Debug, Clone)]
pub struct GradingCandidate {
    pub submission_id: i64,
    pub assignment: i64,
    pub user_id: UserId,
    pub status: SubmissionStatus,
    pub submission_modified: Option<i64>,
    pub grade: Option<GradeRecord>,
}

#[derive(Debug, Clone)]
pub struct GradeRecord {
    pub grade: Option<f64>,
    pub time_modified: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct QuizAttempt {
    pub id: i64,
    /// Question usage holding the attempt's answers.
    pub usage_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionStatus {
    NotYetAnswered,
    Answered,
    RequiresGrading,
    Graded,
}

impl QuestionStatus {
    /// Maps the state of the last step recorded for a question attempt.
    pub fn from_step_state(state: &str) -> Self {
        match state {
            "needsgrading" => QuestionStatus::RequiresGrading,
            "complete" | "invalid" => QuestionStatus::Answered,
            s if s.starts_with("graded") || s.starts_with("mangr") => QuestionStatus::Graded,
            _ => QuestionStatus::NotYetAnswered,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlotState {
    pub slot: i32,
    /// False for informational items such as description questions.
    pub is_real: bool,
    pub status: QuestionStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingCourseSummary {
    pub course_id: CourseId,
    pub is_student: bool,
    pub is_teacher: bool,
    pub unread_forums: usize,
    pub student_pending_assign: usize,
    pub student_pending_quiz: usize,
    pub teacher_pending_assign: usize,
    pub teacher_pending_quiz: usize,
}

impl PendingCourseSummary {
    pub fn for_course(course_id: CourseId) -> Self {
        Self {
            course_id,
            ..Self::default()
        }
    }
}
