use std::collections::{BTreeMap, HashMap, HashSet};

use crate::models::{
    Assignment, ContextId, Course, CourseId, CourseModule, Forum, GradeRecord, GradingCandidate,
    GroupId, GroupMode, QuizAttempt, Quiz, SlotState, SubmissionStatus, UserId,
};
use crate::platform::{Archetype, Capability, Platform};

#[derive(Debug, Clone)]
struct StoredSubmission {
    id: i64,
    assignment: i64,
    user_id: UserId,
    group_id: GroupId,
    status: SubmissionStatus,
    modified: i64,
}

/// In-memory platform for tests. Ids are allocated from one counter so an
/// instance id identifies its module across types.
#[derive(Default)]
pub struct MemoryPlatform {
    next_id: i64,
    courses: BTreeMap<CourseId, Course>,
    course_contexts: HashMap<CourseId, ContextId>,
    context_courses: HashMap<ContextId, CourseId>,
    module_contexts: HashMap<i64, ContextId>,
    module_cms: HashMap<i64, i64>,
    enrolments: HashMap<CourseId, Vec<UserId>>,
    forums: Vec<Forum>,
    assignments: Vec<Assignment>,
    quizzes: Vec<Quiz>,
    unread: HashMap<(i64, UserId), usize>,
    restricted: HashSet<(i64, UserId)>,
    capabilities: HashSet<(UserId, ContextId, Capability)>,
    archetypes: HashSet<(UserId, ContextId, Archetype)>,
    groups: BTreeMap<GroupId, Vec<UserId>>,
    submissions: Vec<StoredSubmission>,
    grades: HashMap<(i64, UserId), GradeRecord>,
    essays: HashSet<i64>,
    attempts: Vec<(i64, UserId, QuizAttempt)>,
    slots: HashMap<i64, Vec<SlotState>>,
}

impl MemoryPlatform {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn visible_cm() -> CourseModule {
        CourseModule {
            id: 0,
            context_id: 0,
            visible: true,
            availability: None,
            group_mode: GroupMode::None,
        }
    }

    pub fn hidden_cm() -> CourseModule {
        CourseModule {
            visible: false,
            ..Self::visible_cm()
        }
    }

    /// An always-open individual assignment.
    pub fn assignment_template(id: i64, course: CourseId) -> Assignment {
        Assignment {
            id,
            course,
            name: format!("Assignment {id}"),
            cm: Self::visible_cm(),
            allow_submissions_from: 0,
            due_date: 0,
            cutoff_date: 0,
            team_submission: false,
        }
    }

    pub fn add_course(&mut self, id: CourseId) -> Course {
        let course = Course {
            id,
            shortname: format!("C{id}"),
            fullname: format!("Course {id}"),
            visible: true,
        };
        let context = self.allocate();
        self.course_contexts.insert(id, context);
        self.context_courses.insert(context, id);
        self.courses.insert(id, course.clone());
        course
    }

    pub fn course_context_of(&self, course_id: CourseId) -> ContextId {
        self.course_contexts[&course_id]
    }

    fn register_module(&mut self, course: CourseId, cm: &mut CourseModule) -> i64 {
        let instance = self.allocate();
        cm.id = self.allocate();
        cm.context_id = self.allocate();
        self.module_contexts.insert(instance, cm.context_id);
        self.module_cms.insert(instance, cm.id);
        self.context_courses.insert(cm.context_id, course);
        instance
    }

    pub fn add_forum(&mut self, course: CourseId) -> i64 {
        let mut cm = Self::visible_cm();
        let id = self.register_module(course, &mut cm);
        self.forums.push(Forum {
            id,
            course,
            name: format!("Forum {id}"),
            cm,
        });
        id
    }

    pub fn add_assignment(&mut self, mut assignment: Assignment) -> i64 {
        let id = self.register_module(assignment.course, &mut assignment.cm);
        assignment.id = id;
        self.assignments.push(assignment);
        id
    }

    pub fn add_quiz(&mut self, course: CourseId, time_open: i64, time_close: i64) -> i64 {
        let mut cm = Self::visible_cm();
        let id = self.register_module(course, &mut cm);
        self.quizzes.push(Quiz {
            id,
            course,
            name: format!("Quiz {id}"),
            cm,
            time_open,
            time_close,
        });
        id
    }

    pub fn enrol(&mut self, user_id: UserId, course: CourseId) {
        let users = self.enrolments.entry(course).or_default();
        if !users.contains(&user_id) {
            users.push(user_id);
        }
    }

    pub fn assign_archetype(&mut self, user_id: UserId, course: CourseId, archetype: Archetype) {
        let context = self.course_context_of(course);
        self.archetypes.insert((user_id, context, archetype));
    }

    pub fn grant_module(&mut self, user_id: UserId, instance: i64, capability: Capability) {
        let context = self.module_contexts[&instance];
        self.capabilities.insert((user_id, context, capability));
    }

    pub fn restrict(&mut self, instance: i64, user_id: UserId) {
        let cm = self.module_cms[&instance];
        self.restricted.insert((cm, user_id));
    }

    pub fn set_unread(&mut self, forum: i64, user_id: UserId, count: usize) {
        self.unread.insert((forum, user_id), count);
    }

    pub fn add_group(&mut self, group_id: GroupId, members: &[UserId]) {
        self.groups.insert(group_id, members.to_vec());
    }

    pub fn submit(&mut self, assignment: i64, user_id: UserId, status: SubmissionStatus, at: i64) {
        let id = self.allocate();
        self.submissions.push(StoredSubmission {
            id,
            assignment,
            user_id,
            group_id: 0,
            status,
            modified: at,
        });
    }

    pub fn submit_for_group(
        &mut self,
        assignment: i64,
        group_id: GroupId,
        status: SubmissionStatus,
        at: i64,
    ) {
        let id = self.allocate();
        self.submissions.push(StoredSubmission {
            id,
            assignment,
            user_id: 0,
            group_id,
            status,
            modified: at,
        });
    }

    pub fn grade(&mut self, assignment: i64, user_id: UserId, grade: Option<f64>, at: i64) {
        self.grades.insert(
            (assignment, user_id),
            GradeRecord {
                grade,
                time_modified: Some(at),
            },
        );
    }

    pub fn mark_essay(&mut self, quiz: i64) {
        self.essays.insert(quiz);
    }

    pub fn add_attempt(&mut self, quiz: i64, user_id: UserId, slots: Vec<SlotState>) {
        let id = self.allocate();
        let usage_id = self.allocate();
        self.attempts.push((quiz, user_id, QuizAttempt { id, usage_id }));
        self.slots.insert(usage_id, slots);
    }

    /// The user's submission group, if they belong to exactly one.
    fn group_of(&self, user_id: UserId) -> Option<GroupId> {
        let mut groups = self
            .groups
            .iter()
            .filter(|(_, members)| members.contains(&user_id))
            .map(|(id, _)| *id);
        match (groups.next(), groups.next()) {
            (Some(group_id), None) => Some(group_id),
            _ => None,
        }
    }

    /// Members a team submission stands for. The default group covers the
    /// enrolled users without a submission group.
    fn team_members(&self, assignment: i64, group_id: GroupId) -> Vec<UserId> {
        if group_id != 0 {
            return self.groups.get(&group_id).cloned().unwrap_or_default();
        }
        let Some(course) = self
            .assignments
            .iter()
            .find(|a| a.id == assignment)
            .map(|a| a.course)
        else {
            return vec![];
        };
        self.enrolments
            .get(&course)
            .into_iter()
            .flatten()
            .copied()
            .filter(|user| self.group_of(*user).is_none())
            .collect()
    }

    /// The latest submission for each (assignment, user or group) key.
    fn latest_submissions(&self) -> Vec<&StoredSubmission> {
        let mut latest: BTreeMap<(i64, UserId, GroupId), &StoredSubmission> = BTreeMap::new();
        for submission in &self.submissions {
            latest.insert(
                (submission.assignment, submission.user_id, submission.group_id),
                submission,
            );
        }
        latest.into_values().collect()
    }
}

impl Platform for MemoryPlatform {
    async fn enrolled_courses(&self, user_id: UserId, _now: i64) -> anyhow::Result<Vec<Course>> {
        Ok(self
            .courses
            .values()
            .filter(|course| {
                self.enrolments
                    .get(&course.id)
                    .is_some_and(|users| users.contains(&user_id))
            })
            .cloned()
            .collect())
    }

    async fn course_context(&self, course_id: CourseId) -> anyhow::Result<ContextId> {
        self.course_contexts
            .get(&course_id)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no context for course {course_id}"))
    }

    async fn forums(&self, course_id: CourseId) -> anyhow::Result<Vec<Forum>> {
        Ok(self
            .forums
            .iter()
            .filter(|f| f.course == course_id)
            .cloned()
            .collect())
    }

    async fn assignments(&self, course_id: CourseId) -> anyhow::Result<Vec<Assignment>> {
        Ok(self
            .assignments
            .iter()
            .filter(|a| a.course == course_id)
            .cloned()
            .collect())
    }

    async fn quizzes(&self, course_id: CourseId) -> anyhow::Result<Vec<Quiz>> {
        Ok(self
            .quizzes
            .iter()
            .filter(|q| q.course == course_id)
            .cloned()
            .collect())
    }

    async fn forum_unread_posts(
        &self,
        forum: &Forum,
        user_id: UserId,
        _now: i64,
    ) -> anyhow::Result<usize> {
        Ok(self.unread.get(&(forum.id, user_id)).copied().unwrap_or(0))
    }

    async fn is_user_visible(
        &self,
        cm: &CourseModule,
        user_id: UserId,
        _now: i64,
    ) -> anyhow::Result<bool> {
        Ok(!self.restricted.contains(&(cm.id, user_id)))
    }

    async fn has_capability(
        &self,
        user_id: UserId,
        context_id: ContextId,
        capability: Capability,
    ) -> anyhow::Result<bool> {
        Ok(self.capabilities.contains(&(user_id, context_id, capability)))
    }

    async fn has_archetype(
        &self,
        user_id: UserId,
        context_id: ContextId,
        archetype: Archetype,
    ) -> anyhow::Result<bool> {
        Ok(self.archetypes.contains(&(user_id, context_id, archetype)))
    }

    async fn enrolled_users(
        &self,
        context_id: ContextId,
        capability: Option<Capability>,
    ) -> anyhow::Result<Vec<UserId>> {
        let Some(course) = self.context_courses.get(&context_id) else {
            return Ok(vec![]);
        };
        let users = self.enrolments.get(course).cloned().unwrap_or_default();
        Ok(users
            .into_iter()
            .filter(|user| match capability {
                Some(cap) => self.capabilities.contains(&(*user, context_id, cap)),
                None => true,
            })
            .collect())
    }

    async fn count_submitted(&self, assignment_id: i64, user_id: UserId) -> anyhow::Result<usize> {
        Ok(self
            .submissions
            .iter()
            .filter(|s| {
                s.assignment == assignment_id
                    && s.user_id == user_id
                    && s.status == SubmissionStatus::Submitted
            })
            .count())
    }

    async fn group_has_submitted(
        &self,
        assignment: &Assignment,
        user_id: UserId,
    ) -> anyhow::Result<bool> {
        let group_id = self.group_of(user_id).unwrap_or(0);
        Ok(self.latest_submissions().iter().any(|s| {
            s.assignment == assignment.id
                && s.user_id == 0
                && s.group_id == group_id
                && s.status == SubmissionStatus::Submitted
        }))
    }

    async fn submission_group_members(
        &self,
        _assignment: &Assignment,
        user_id: UserId,
    ) -> anyhow::Result<Option<Vec<UserId>>> {
        Ok(self
            .group_of(user_id)
            .map(|group_id| self.groups[&group_id].clone()))
    }

    async fn grading_candidates(
        &self,
        assignment_ids: &[i64],
    ) -> anyhow::Result<Vec<GradingCandidate>> {
        let mut candidates = Vec::new();
        for submission in self.latest_submissions() {
            if !assignment_ids.contains(&submission.assignment) {
                continue;
            }
            let users = if submission.user_id == 0 {
                self.team_members(submission.assignment, submission.group_id)
            } else {
                vec![submission.user_id]
            };
            for user_id in users {
                candidates.push(GradingCandidate {
                    submission_id: submission.id,
                    assignment: submission.assignment,
                    user_id,
                    status: submission.status,
                    submission_modified: Some(submission.modified),
                    grade: self.grades.get(&(submission.assignment, user_id)).cloned(),
                });
            }
        }
        Ok(candidates)
    }

    async fn quiz_essay_count(&self, _course_id: CourseId, quiz_id: i64) -> anyhow::Result<usize> {
        Ok(usize::from(self.essays.contains(&quiz_id)))
    }

    async fn quiz_attempts(
        &self,
        quiz_id: i64,
        user_id: UserId,
    ) -> anyhow::Result<Vec<QuizAttempt>> {
        Ok(self
            .attempts
            .iter()
            .filter(|(quiz, user, _)| *quiz == quiz_id && *user == user_id)
            .map(|(_, _, attempt)| attempt.clone())
            .collect())
    }

    async fn attempt_slots(&self, attempt: &QuizAttempt) -> anyhow::Result<Vec<SlotState>> {
        Ok(self.slots.get(&attempt.usage_id).cloned().unwrap_or_default())
    }
}
