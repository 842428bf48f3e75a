//! The queries the aggregator makes against the host course platform.

use crate::models::{
    Assignment, ContextId, Course, CourseId, CourseModule, Forum, GradingCandidate, QuizAttempt,
    Quiz, SlotState, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    AssignSubmit,
    AssignGrade,
    AssignView,
    QuizViewReports,
    AccessAllGroups,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::AssignSubmit => "mod/assign:submit",
            Capability::AssignGrade => "mod/assign:grade",
            Capability::AssignView => "mod/assign:view",
            Capability::QuizViewReports => "mod/quiz:viewreports",
            Capability::AccessAllGroups => "moodle/site:accessallgroups",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Archetype {
    Student,
    Teacher,
    EditingTeacher,
}

impl Archetype {
    pub fn as_str(self) -> &'static str {
        match self {
            Archetype::Student => "student",
            Archetype::Teacher => "teacher",
            Archetype::EditingTeacher => "editingteacher",
        }
    }
}

/// Read-only access to courses, enrolments, permissions and activity state.
///
/// `now` is passed wherever the answer depends on the clock so that one
/// render sees a single reference time.
#[allow(async_fn_in_trait)]
pub trait Platform {
    /// Courses with an active enrolment for the user, in course sort order.
    async fn enrolled_courses(&self, user_id: UserId, now: i64) -> anyhow::Result<Vec<Course>>;

    async fn course_context(&self, course_id: CourseId) -> anyhow::Result<ContextId>;

    async fn forums(&self, course_id: CourseId) -> anyhow::Result<Vec<Forum>>;

    async fn assignments(&self, course_id: CourseId) -> anyhow::Result<Vec<Assignment>>;

    async fn quizzes(&self, course_id: CourseId) -> anyhow::Result<Vec<Quiz>>;

    /// Unread posts in one forum, aware of the user's groups.
    async fn forum_unread_posts(
        &self,
        forum: &Forum,
        user_id: UserId,
        now: i64,
    ) -> anyhow::Result<usize>;

    /// Evaluates the module's availability restrictions for the user.
    async fn is_user_visible(
        &self,
        cm: &CourseModule,
        user_id: UserId,
        now: i64,
    ) -> anyhow::Result<bool>;

    async fn has_capability(
        &self,
        user_id: UserId,
        context_id: ContextId,
        capability: Capability,
    ) -> anyhow::Result<bool>;

    async fn has_archetype(
        &self,
        user_id: UserId,
        context_id: ContextId,
        archetype: Archetype,
    ) -> anyhow::Result<bool>;

    /// Users enrolled in the course owning `context_id`, optionally limited
    /// to those holding `capability` there.
    async fn enrolled_users(
        &self,
        context_id: ContextId,
        capability: Option<Capability>,
    ) -> anyhow::Result<Vec<UserId>>;

    /// Individual submissions by the user with status "submitted".
    async fn count_submitted(&self, assignment_id: i64, user_id: UserId) -> anyhow::Result<usize>;

    /// Whether the group the user submits with has a "submitted" submission.
    async fn group_has_submitted(
        &self,
        assignment: &Assignment,
        user_id: UserId,
    ) -> anyhow::Result<bool>;

    /// Members of the group the user submits with, or `None` when the user
    /// is in no group for this assignment.
    async fn submission_group_members(
        &self,
        assignment: &Assignment,
        user_id: UserId,
    ) -> anyhow::Result<Option<Vec<UserId>>>;

    /// Latest submissions of the given assignments joined with their grades.
    async fn grading_candidates(
        &self,
        assignment_ids: &[i64],
    ) -> anyhow::Result<Vec<GradingCandidate>>;

    /// Number of essay questions placed in the quiz.
    async fn quiz_essay_count(&self, course_id: CourseId, quiz_id: i64) -> anyhow::Result<usize>;

    /// Finished, non-preview attempts.
    async fn quiz_attempts(&self, quiz_id: i64, user_id: UserId)
        -> anyhow::Result<Vec<QuizAttempt>>;

    async fn attempt_slots(&self, attempt: &QuizAttempt) -> anyhow::Result<Vec<SlotState>>;
}
