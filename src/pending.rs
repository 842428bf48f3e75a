use std::collections::{HashMap, HashSet};

use crate::models::{
    Assignment, ContextId, Course, GradingCandidate, QuestionStatus, Quiz, SubmissionStatus, UserId,
};
use crate::platform::{Archetype, Capability, Platform};

/// Unmarked submission ids keyed by assignment id, then user id.
pub type UnmarkedSubmissions = HashMap<i64, HashMap<UserId, i64>>;

/// Whether the assignment currently accepts submissions.
pub fn assignment_is_open(assignment: &Assignment, now: i64) -> bool {
    if assignment.due_date != 0 {
        if assignment.cutoff_date != 0 {
            assignment.allow_submissions_from <= now && now <= assignment.cutoff_date
        } else {
            assignment.allow_submissions_from <= now
        }
    } else if assignment.allow_submissions_from != 0 {
        assignment.allow_submissions_from <= now
    } else {
        true
    }
}

pub fn open_assignment_ids(assignments: &[Assignment], now: i64) -> HashSet<i64> {
    assignments
        .iter()
        .filter(|assignment| assignment_is_open(assignment, now))
        .map(|assignment| assignment.id)
        .collect()
}

pub fn quiz_is_active(time_open: i64, time_close: i64, now: i64) -> bool {
    (time_close != 0 && time_close >= now && time_open < now)
        || (time_close == 0 && time_open < now)
        || (time_close == 0 && time_open == 0)
}

/// A latest submission needs grading when it was submitted after its grade,
/// or when it has no usable grade at all.
pub fn needs_grading(candidate: &GradingCandidate) -> bool {
    let Some(modified) = candidate.submission_modified else {
        return false;
    };
    if candidate.status != SubmissionStatus::Submitted {
        return false;
    }

    match &candidate.grade {
        None => true,
        Some(grade) => match grade.time_modified {
            None => true,
            Some(graded_at) => modified > graded_at || grade.grade.is_none(),
        },
    }
}

pub fn unmarked_submissions(candidates: &[GradingCandidate]) -> UnmarkedSubmissions {
    let mut unmarked: UnmarkedSubmissions = HashMap::new();

    for candidate in candidates.iter().filter(|c| needs_grading(c)) {
        unmarked
            .entry(candidate.assignment)
            .or_default()
            .insert(candidate.user_id, candidate.submission_id);
    }

    unmarked
}

pub async fn count_pending_forum<P: Platform>(
    platform: &P,
    course: &Course,
    user_id: UserId,
    now: i64,
) -> anyhow::Result<usize> {
    let mut total = 0;
    for forum in platform.forums(course.id).await? {
        let unread = platform.forum_unread_posts(&forum, user_id, now).await?;
        tracing::debug!(forum = forum.id, name = %forum.name, unread, "forum unread posts");
        total += unread;
    }
    Ok(total)
}

/// Visible, open to the user through its restrictions, and in the open set.
async fn assignment_reachable<P: Platform>(
    platform: &P,
    assignment: &Assignment,
    open_ids: &HashSet<i64>,
    user_id: UserId,
    now: i64,
) -> anyhow::Result<bool> {
    if !open_ids.contains(&assignment.id) || !assignment.cm.visible {
        return Ok(false);
    }
    platform.is_user_visible(&assignment.cm, user_id, now).await
}

pub async fn count_student_pending_assign<P: Platform>(
    platform: &P,
    course: &Course,
    user_id: UserId,
    now: i64,
) -> anyhow::Result<usize> {
    let assignments = platform.assignments(course.id).await?;
    let open_ids = open_assignment_ids(&assignments, now);
    if open_ids.is_empty() {
        return Ok(0);
    }

    let mut sum = 0;
    for assignment in &assignments {
        if !assignment_reachable(platform, assignment, &open_ids, user_id, now).await? {
            continue;
        }
        if !platform
            .has_capability(user_id, assignment.cm.context_id, Capability::AssignSubmit)
            .await?
        {
            continue;
        }

        let submitted = if assignment.team_submission {
            platform.group_has_submitted(assignment, user_id).await?
        } else {
            platform.count_submitted(assignment.id, user_id).await? > 0
        };

        if !submitted {
            tracing::debug!(
                assignment = assignment.id,
                name = %assignment.name,
                "assignment pending submission"
            );
            sum += 1;
        }
    }

    Ok(sum)
}

pub async fn count_teacher_pending_assign<P: Platform>(
    platform: &P,
    course: &Course,
    user_id: UserId,
    now: i64,
) -> anyhow::Result<usize> {
    let assignments = platform.assignments(course.id).await?;
    let open_ids = open_assignment_ids(&assignments, now);
    if open_ids.is_empty() {
        return Ok(0);
    }

    let mut ids: Vec<i64> = open_ids.iter().copied().collect();
    ids.sort_unstable();
    let candidates = platform.grading_candidates(&ids).await?;
    let unmarked = unmarked_submissions(&candidates);

    let mut sum = 0;
    for assignment in &assignments {
        if !assignment_reachable(platform, assignment, &open_ids, user_id, now).await? {
            continue;
        }
        let context_id = assignment.cm.context_id;
        if !platform
            .has_capability(user_id, context_id, Capability::AssignGrade)
            .await?
        {
            continue;
        }

        let Some(ungraded) = unmarked.get(&assignment.id) else {
            continue;
        };

        let mut population = platform
            .enrolled_users(context_id, Some(Capability::AssignView))
            .await?;
        if assignment.team_submission {
            if let Some(members) = platform.submission_group_members(assignment, user_id).await? {
                population.retain(|student| members.contains(student));
            }
        }

        let pending = population
            .iter()
            .filter(|student| ungraded.contains_key(student))
            .count();
        tracing::debug!(assignment = assignment.id, pending, "submissions awaiting grading");
        sum += pending;
    }

    Ok(sum)
}

async fn quiz_reachable<P: Platform>(
    platform: &P,
    quiz: &Quiz,
    user_id: UserId,
    now: i64,
) -> anyhow::Result<bool> {
    if !quiz.cm.visible {
        return Ok(false);
    }
    platform.is_user_visible(&quiz.cm, user_id, now).await
}

pub async fn count_student_pending_quiz<P: Platform>(
    platform: &P,
    course: &Course,
    user_id: UserId,
    now: i64,
) -> anyhow::Result<usize> {
    let mut sum = 0;

    for quiz in platform.quizzes(course.id).await? {
        if !quiz_is_active(quiz.time_open, quiz.time_close, now) {
            continue;
        }
        if !quiz_reachable(platform, &quiz, user_id, now).await? {
            continue;
        }
        if platform
            .has_capability(user_id, quiz.cm.context_id, Capability::QuizViewReports)
            .await?
        {
            continue;
        }

        if platform.quiz_attempts(quiz.id, user_id).await?.is_empty() {
            tracing::debug!(quiz = quiz.id, name = %quiz.name, "quiz not attempted");
            sum += 1;
        }
    }

    Ok(sum)
}

/// Counts quizzes with at least one essay answer waiting for a grader.
/// A quiz adds one no matter how many answers are waiting.
pub async fn count_teacher_pending_quiz<P: Platform>(
    platform: &P,
    course: &Course,
    user_id: UserId,
    now: i64,
) -> anyhow::Result<usize> {
    let mut sum = 0;
    let quizzes = platform.quizzes(course.id).await?;
    if quizzes.is_empty() {
        return Ok(0);
    }
    let course_context = platform.course_context(course.id).await?;

    for quiz in &quizzes {
        if !quiz_reachable(platform, quiz, user_id, now).await? {
            continue;
        }
        if platform.quiz_essay_count(course.id, quiz.id).await? == 0 {
            continue;
        }
        if !quiz_is_active(quiz.time_open, quiz.time_close, now) {
            continue;
        }
        if !platform
            .has_capability(user_id, quiz.cm.context_id, Capability::QuizViewReports)
            .await?
        {
            continue;
        }

        if quiz_has_ungraded_answer(platform, quiz, course_context).await? {
            tracing::debug!(quiz = quiz.id, name = %quiz.name, "quiz has answers to review");
            sum += 1;
        }
    }

    Ok(sum)
}

async fn quiz_has_ungraded_answer<P: Platform>(
    platform: &P,
    quiz: &Quiz,
    course_context: ContextId,
) -> anyhow::Result<bool> {
    for student in platform.enrolled_users(course_context, None).await? {
        if !platform
            .has_archetype(student, course_context, Archetype::Student)
            .await?
        {
            continue;
        }

        for attempt in platform.quiz_attempts(quiz.id, student).await? {
            let slots = platform.attempt_slots(&attempt).await?;
            if let Some(slot) = slots
                .iter()
                .find(|slot| slot.is_real && slot.status == QuestionStatus::RequiresGrading)
            {
                tracing::debug!(attempt = attempt.id, slot = slot.slot, "answer requires grading");
                return Ok(true);
            }
        }
    }

    Ok(false)
}
