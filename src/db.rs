use std::collections::HashMap;

use anyhow::Context;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::availability::{self, UserScope};
use crate::models::{
    Assignment, ContextId, Course, CourseId, CourseModule, Forum, GradeRecord, GradingCandidate,
    GroupId, GroupMode, QuestionStatus, QuizAttempt, Quiz, SlotState, SubmissionStatus, UserId,
};
use crate::platform::{Archetype, Capability, Platform};

const CONTEXT_COURSE: i32 = 50;
const CONTEXT_MODULE: i32 = 70;
const CAP_ALLOW: i64 = 1;
const CAP_PROHIBIT: i64 = -1000;
const SECONDS_PER_DAY: i64 = 86_400;
/// Discussion group id meaning "all participants".
const ALL_PARTICIPANTS: GroupId = -1;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::raw_sql(include_str!("../seeds/demo.sql"))
        .execute(pool)
        .await
        .context("failed to load demo site")?;
    Ok(())
}

/// Reads the platform's own tables.
pub struct PgPlatform {
    pool: PgPool,
    prefix: String,
    forum_old_post_days: i64,
}

impl PgPlatform {
    pub fn new(pool: PgPool, prefix: &str, forum_old_post_days: i64) -> Self {
        Self {
            pool,
            prefix: prefix.to_string(),
            forum_old_post_days,
        }
    }

    /// Expands `{name}` table references with the configured prefix.
    fn sql(&self, template: &str) -> String {
        let mut query = String::with_capacity(template.len() + 32);
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            query.push_str(&rest[..start]);
            match rest[start..].find('}') {
                Some(end) => {
                    query.push_str(&self.prefix);
                    query.push_str(&rest[start + 1..start + end]);
                    rest = &rest[start + end + 1..];
                }
                None => {
                    rest = &rest[start..];
                    break;
                }
            }
        }
        query.push_str(rest);
        query
    }

    fn module_query(&self, table: &str, module: &str, columns: &str) -> String {
        self.sql(&format!(
            "SELECT {columns}, cm.id AS cmid, cm.visible, cm.availability, cm.groupmode, \
             ctx.id AS contextid \
             FROM {{{table}}} i \
             JOIN {{course_modules}} cm ON cm.instance = i.id \
             JOIN {{modules}} m ON m.id = cm.module AND m.name = '{module}' \
             JOIN {{context}} ctx ON ctx.instanceid = cm.id AND ctx.contextlevel = {CONTEXT_MODULE} \
             WHERE i.course = $1 AND cm.deletioninprogress = 0 \
             ORDER BY cm.section, cm.id"
        ))
    }

    /// Groups and groupings the user belongs to in the course.
    async fn user_scope(&self, course_id: CourseId, user_id: UserId, now: i64) -> anyhow::Result<UserScope> {
        let group_ids: Vec<i64> = sqlx::query_scalar(&self.sql(
            "SELECT g.id FROM {groups} g \
             JOIN {groups_members} gm ON gm.groupid = g.id \
             WHERE g.courseid = $1 AND gm.userid = $2",
        ))
        .bind(course_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load user groups")?;

        let grouping_ids: Vec<i64> = sqlx::query_scalar(&self.sql(
            "SELECT DISTINCT gg.groupingid FROM {groupings_groups} gg \
             JOIN {groups_members} gm ON gm.groupid = gg.groupid \
             JOIN {groupings} gs ON gs.id = gg.groupingid \
             WHERE gs.courseid = $1 AND gm.userid = $2",
        ))
        .bind(course_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load user groupings")?;

        Ok(UserScope {
            now,
            group_ids,
            grouping_ids,
        })
    }

    /// The group the user submits with: their only group within the
    /// assignment's grouping (or the course when there is none). Users in
    /// no group or in several submit with the default group.
    async fn submission_group(
        &self,
        assignment: &Assignment,
        user_id: UserId,
    ) -> anyhow::Result<Option<GroupId>> {
        let group_ids: Vec<GroupId> = sqlx::query_scalar(&self.sql(
            "SELECT g.id FROM {groups} g \
             JOIN {groups_members} gm ON gm.groupid = g.id \
             JOIN {assign} a ON a.course = g.courseid \
             WHERE a.id = $1 AND gm.userid = $2 \
             AND (a.teamsubmissiongroupingid = 0 OR EXISTS ( \
                 SELECT 1 FROM {groupings_groups} gg \
                 WHERE gg.groupid = g.id AND gg.groupingid = a.teamsubmissiongroupingid)) \
             ORDER BY g.id",
        ))
        .bind(assignment.id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to resolve submission group")?;
        Ok(single_group(&group_ids))
    }
}

fn course_module(row: &PgRow) -> CourseModule {
    CourseModule {
        id: row.get("cmid"),
        context_id: row.get("contextid"),
        visible: row.get::<i16, _>("visible") != 0,
        availability: row.get("availability"),
        group_mode: GroupMode::from_db(row.get::<i16, _>("groupmode").into()),
    }
}

impl Platform for PgPlatform {
    async fn enrolled_courses(&self, user_id: UserId, now: i64) -> anyhow::Result<Vec<Course>> {
        let rows = sqlx::query(&self.sql(
            "SELECT c.id, c.shortname, c.fullname, c.visible \
             FROM {course} c \
             WHERE c.id <> 1 AND EXISTS ( \
                 SELECT 1 FROM {enrol} e \
                 JOIN {user_enrolments} ue ON ue.enrolid = e.id \
                 WHERE e.courseid = c.id AND ue.userid = $1 \
                 AND e.status = 0 AND ue.status = 0 \
                 AND ue.timestart <= $2 AND (ue.timeend = 0 OR ue.timeend > $2)) \
             ORDER BY c.sortorder",
        ))
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("failed to load enrolled courses")?;

        let mut courses = Vec::new();
        for row in rows {
            courses.push(Course {
                id: row.get("id"),
                shortname: row.get("shortname"),
                fullname: row.get("fullname"),
                visible: row.get::<i16, _>("visible") != 0,
            });
        }

        Ok(courses)
    }

    async fn course_context(&self, course_id: CourseId) -> anyhow::Result<ContextId> {
        sqlx::query_scalar(&self.sql(
            "SELECT id FROM {context} WHERE contextlevel = $1 AND instanceid = $2",
        ))
        .bind(CONTEXT_COURSE)
        .bind(course_id)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("no context for course {course_id}"))
    }

    async fn forums(&self, course_id: CourseId) -> anyhow::Result<Vec<Forum>> {
        let rows = sqlx::query(&self.module_query("forum", "forum", "i.id, i.course, i.name"))
            .bind(course_id)
            .fetch_all(&self.pool)
            .await
            .context("failed to load forums")?;

        Ok(rows
            .iter()
            .map(|row| Forum {
                id: row.get("id"),
                course: row.get("course"),
                name: row.get("name"),
                cm: course_module(row),
            })
            .collect())
    }

    async fn assignments(&self, course_id: CourseId) -> anyhow::Result<Vec<Assignment>> {
        let rows = sqlx::query(&self.module_query(
            "assign",
            "assign",
            "i.id, i.course, i.name, i.allowsubmissionsfromdate, i.duedate, i.cutoffdate, \
             i.teamsubmission",
        ))
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load assignments")?;

        Ok(rows
            .iter()
            .map(|row| Assignment {
                id: row.get("id"),
                course: row.get("course"),
                name: row.get("name"),
                cm: course_module(row),
                allow_submissions_from: row.get("allowsubmissionsfromdate"),
                due_date: row.get("duedate"),
                cutoff_date: row.get("cutoffdate"),
                team_submission: row.get::<i16, _>("teamsubmission") != 0,
            })
            .collect())
    }

    async fn quizzes(&self, course_id: CourseId) -> anyhow::Result<Vec<Quiz>> {
        let rows = sqlx::query(&self.module_query(
            "quiz",
            "quiz",
            "i.id, i.course, i.name, i.timeopen, i.timeclose",
        ))
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load quizzes")?;

        Ok(rows
            .iter()
            .map(|row| Quiz {
                id: row.get("id"),
                course: row.get("course"),
                name: row.get("name"),
                cm: course_module(row),
                time_open: row.get("timeopen"),
                time_close: row.get("timeclose"),
            })
            .collect())
    }

    async fn forum_unread_posts(
        &self,
        forum: &Forum,
        user_id: UserId,
        now: i64,
    ) -> anyhow::Result<usize> {
        let cutoff = unread_cutoff(now, self.forum_old_post_days);
        let scope = if forum.cm.group_mode != GroupMode::Separate
            || self
                .has_capability(user_id, forum.cm.context_id, Capability::AccessAllGroups)
                .await?
        {
            DiscussionScope::All
        } else {
            let group_ids: Vec<GroupId> = sqlx::query_scalar(&self.sql(
                "SELECT g.id FROM {groups} g \
                 JOIN {groups_members} gm ON gm.groupid = g.id \
                 WHERE g.courseid = $1 AND gm.userid = $2",
            ))
            .bind(forum.course)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .context("failed to load forum groups")?;
            DiscussionScope::Groups(group_ids)
        };

        let rows = sqlx::query(&self.sql(
            "SELECT p.modified, d.groupid, (r.id IS NOT NULL) AS seen \
             FROM {forum_posts} p \
             JOIN {forum_discussions} d ON d.id = p.discussion \
             LEFT JOIN {forum_read} r ON r.postid = p.id AND r.userid = $2 \
             WHERE d.forum = $1",
        ))
        .bind(forum.id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to load posts in forum {}", forum.id))?;

        let posts: Vec<ForumPost> = rows
            .iter()
            .map(|row| ForumPost {
                modified: row.get("modified"),
                group_id: row.get("groupid"),
                read: row.get("seen"),
            })
            .collect();
        Ok(unread_posts(&posts, cutoff, &scope))
    }

    async fn is_user_visible(
        &self,
        cm: &CourseModule,
        user_id: UserId,
        now: i64,
    ) -> anyhow::Result<bool> {
        if cm.availability.as_deref().map_or(true, |rule| rule.trim().is_empty()) {
            return Ok(true);
        }

        let course_id: CourseId = sqlx::query_scalar(&self.sql(
            "SELECT course FROM {course_modules} WHERE id = $1",
        ))
        .bind(cm.id)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("no course module {}", cm.id))?;

        let scope = self.user_scope(course_id, user_id, now).await?;
        availability::is_available(cm.availability.as_deref(), &scope)
            .with_context(|| format!("bad availability on course module {}", cm.id))
    }

    async fn has_capability(
        &self,
        user_id: UserId,
        context_id: ContextId,
        capability: Capability,
    ) -> anyhow::Result<bool> {
        let permissions: Vec<i64> = sqlx::query_scalar(&self.sql(
            "WITH ancestors AS ( \
                 SELECT a.id FROM {context} c \
                 JOIN {context} a ON c.path = a.path OR c.path LIKE a.path || '/%' \
                 WHERE c.id = $1) \
             SELECT rc.permission FROM {role_assignments} ra \
             JOIN {role_capabilities} rc ON rc.roleid = ra.roleid \
             WHERE ra.userid = $2 AND rc.capability = $3 \
             AND ra.contextid IN (SELECT id FROM ancestors) \
             AND rc.contextid IN (SELECT id FROM ancestors)",
        ))
        .bind(context_id)
        .bind(user_id)
        .bind(capability.as_str())
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to check {}", capability.as_str()))?;

        Ok(permission_granted(&permissions))
    }

    async fn has_archetype(
        &self,
        user_id: UserId,
        context_id: ContextId,
        archetype: Archetype,
    ) -> anyhow::Result<bool> {
        let found: bool = sqlx::query_scalar(&self.sql(
            "SELECT EXISTS ( \
                 SELECT 1 FROM {role_assignments} ra \
                 JOIN {role} r ON r.id = ra.roleid \
                 JOIN {context} c ON c.id = $1 \
                 JOIN {context} a ON a.id = ra.contextid \
                 WHERE ra.userid = $2 AND r.archetype = $3 \
                 AND (c.path = a.path OR c.path LIKE a.path || '/%'))",
        ))
        .bind(context_id)
        .bind(user_id)
        .bind(archetype.as_str())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to check role {}", archetype.as_str()))?;
        Ok(found)
    }

    async fn enrolled_users(
        &self,
        context_id: ContextId,
        capability: Option<Capability>,
    ) -> anyhow::Result<Vec<UserId>> {
        let course_id: CourseId = sqlx::query_scalar(&self.sql(
            "SELECT CASE WHEN c.contextlevel = $2 THEN c.instanceid ELSE cm.course END \
             FROM {context} c \
             LEFT JOIN {course_modules} cm ON c.contextlevel = $3 AND cm.id = c.instanceid \
             WHERE c.id = $1",
        ))
        .bind(context_id)
        .bind(CONTEXT_COURSE)
        .bind(CONTEXT_MODULE)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("context {context_id} is not in a course"))?;

        let users: Vec<UserId> = sqlx::query_scalar(&self.sql(
            "SELECT DISTINCT u.id FROM {user} u \
             JOIN {user_enrolments} ue ON ue.userid = u.id \
             JOIN {enrol} e ON e.id = ue.enrolid \
             WHERE e.courseid = $1 AND u.deleted = 0 \
             ORDER BY u.id",
        ))
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load enrolled users")?;

        let Some(capability) = capability else {
            return Ok(users);
        };

        let mut allowed = Vec::with_capacity(users.len());
        for user_id in users {
            if self.has_capability(user_id, context_id, capability).await? {
                allowed.push(user_id);
            }
        }
        Ok(allowed)
    }

    async fn count_submitted(&self, assignment_id: i64, user_id: UserId) -> anyhow::Result<usize> {
        let count: i64 = sqlx::query_scalar(&self.sql(
            "SELECT COUNT(*) FROM {assign_submission} \
             WHERE assignment = $1 AND userid = $2 AND status = $3",
        ))
        .bind(assignment_id)
        .bind(user_id)
        .bind(SubmissionStatus::Submitted.as_str())
        .fetch_one(&self.pool)
        .await
        .context("failed to count submissions")?;
        Ok(count.max(0) as usize)
    }

    async fn group_has_submitted(
        &self,
        assignment: &Assignment,
        user_id: UserId,
    ) -> anyhow::Result<bool> {
        let group_id = self.submission_group(assignment, user_id).await?.unwrap_or(0);
        let submitted: bool = sqlx::query_scalar(&self.sql(
            "SELECT EXISTS ( \
                 SELECT 1 FROM {assign_submission} \
                 WHERE assignment = $1 AND userid = 0 AND groupid = $2 \
                 AND latest = 1 AND status = $3)",
        ))
        .bind(assignment.id)
        .bind(group_id)
        .bind(SubmissionStatus::Submitted.as_str())
        .fetch_one(&self.pool)
        .await
        .context("failed to look up group submission")?;
        Ok(submitted)
    }

    async fn submission_group_members(
        &self,
        assignment: &Assignment,
        user_id: UserId,
    ) -> anyhow::Result<Option<Vec<UserId>>> {
        let Some(group_id) = self.submission_group(assignment, user_id).await? else {
            return Ok(None);
        };

        let members: Vec<UserId> = sqlx::query_scalar(&self.sql(
            "SELECT userid FROM {groups_members} WHERE groupid = $1 ORDER BY userid",
        ))
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load group members")?;
        Ok(Some(members))
    }

    async fn grading_candidates(
        &self,
        assignment_ids: &[i64],
    ) -> anyhow::Result<Vec<GradingCandidate>> {
        // Team submissions expand to their group's members. The default
        // group stands for the enrolled users without exactly one group.
        let rows = sqlx::query(&self.sql(
            "SELECT s.id, s.assignment, s.status, s.timemodified, s.attemptnumber, \
                    COALESCE(members.userid, s.userid) AS userid \
             FROM {assign_submission} s \
             JOIN {assign} a ON a.id = s.assignment \
             LEFT JOIN LATERAL ( \
                 SELECT gm.userid FROM {groups_members} gm \
                 WHERE s.groupid <> 0 AND gm.groupid = s.groupid \
                 UNION \
                 SELECT ue.userid FROM {user_enrolments} ue \
                 JOIN {enrol} e ON e.id = ue.enrolid \
                 WHERE s.groupid = 0 AND e.courseid = a.course \
                 AND ( \
                     SELECT COUNT(*) FROM {groups_members} ugm \
                     JOIN {groups} ug ON ug.id = ugm.groupid \
                     WHERE ug.courseid = a.course AND ugm.userid = ue.userid \
                     AND (a.teamsubmissiongroupingid = 0 OR EXISTS ( \
                         SELECT 1 FROM {groupings_groups} gg \
                         WHERE gg.groupid = ug.id \
                         AND gg.groupingid = a.teamsubmissiongroupingid))) <> 1 \
             ) members ON s.userid = 0 \
             WHERE s.latest = 1 AND s.assignment = ANY($1) AND s.status = $2 \
             AND (s.userid <> 0 OR members.userid IS NOT NULL)",
        ))
        .bind(assignment_ids)
        .bind(SubmissionStatus::Submitted.as_str())
        .fetch_all(&self.pool)
        .await
        .context("failed to load submissions for grading")?;

        let submissions: Vec<SubmissionRow> = rows
            .iter()
            .map(|row| SubmissionRow {
                id: row.get("id"),
                assignment: row.get("assignment"),
                user_id: row.get("userid"),
                status: row.get("status"),
                modified: row.get("timemodified"),
                attempt_number: row.get("attemptnumber"),
            })
            .collect();

        let rows = sqlx::query(&self.sql(
            "SELECT assignment, userid, attemptnumber, grade::float8 AS grade, timemodified \
             FROM {assign_grades} WHERE assignment = ANY($1)",
        ))
        .bind(assignment_ids)
        .fetch_all(&self.pool)
        .await
        .context("failed to load grades")?;

        let grades: Vec<GradeRow> = rows
            .iter()
            .map(|row| GradeRow {
                assignment: row.get("assignment"),
                user_id: row.get("userid"),
                attempt_number: row.get("attemptnumber"),
                grade: row.get("grade"),
                time_modified: row.get("timemodified"),
            })
            .collect();

        Ok(join_grades(submissions, grades))
    }

    async fn quiz_essay_count(&self, course_id: CourseId, quiz_id: i64) -> anyhow::Result<usize> {
        let total: i64 = sqlx::query_scalar(&self.sql(
            "SELECT COUNT(q.id) FROM {question} q \
             JOIN {quiz_slots} qs ON qs.questionid = q.id \
             JOIN {quiz} z ON z.id = qs.quizid \
             WHERE z.course = $1 AND z.id = $2 AND q.qtype = 'essay'",
        ))
        .bind(course_id)
        .bind(quiz_id)
        .fetch_one(&self.pool)
        .await
        .context("failed to count essay questions")?;
        Ok(total.max(0) as usize)
    }

    async fn quiz_attempts(
        &self,
        quiz_id: i64,
        user_id: UserId,
    ) -> anyhow::Result<Vec<QuizAttempt>> {
        let rows = sqlx::query(&self.sql(
            "SELECT id, uniqueid, state, preview FROM {quiz_attempts} \
             WHERE quiz = $1 AND userid = $2 \
             ORDER BY attempt",
        ))
        .bind(quiz_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load quiz attempts")?;

        Ok(rows
            .iter()
            .filter(|row| counts_attempt(row.get("state"), row.get("preview")))
            .map(|row| QuizAttempt {
                id: row.get("id"),
                usage_id: row.get("uniqueid"),
            })
            .collect())
    }

    async fn attempt_slots(&self, attempt: &QuizAttempt) -> anyhow::Result<Vec<SlotState>> {
        let rows = sqlx::query(&self.sql(
            "SELECT qa.slot, q.qtype, COALESCE(( \
                 SELECT qas.state FROM {question_attempt_steps} qas \
                 WHERE qas.questionattemptid = qa.id \
                 ORDER BY qas.sequencenumber DESC LIMIT 1), 'todo') AS state \
             FROM {question_attempts} qa \
             JOIN {question} q ON q.id = qa.questionid \
             WHERE qa.questionusageid = $1 \
             ORDER BY qa.slot",
        ))
        .bind(attempt.usage_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load attempt slots")?;

        let mut slots = Vec::with_capacity(rows.len());
        for row in rows {
            let qtype: String = row.get("qtype");
            let state: String = row.get("state");
            let slot = row.get::<i64, _>("slot");
            slots.push(SlotState {
                slot: i32::try_from(slot).with_context(|| format!("slot {slot} out of range"))?,
                is_real: qtype != "description",
                status: QuestionStatus::from_step_state(&state),
            });
        }
        Ok(slots)
    }
}

struct ForumPost {
    modified: i64,
    group_id: GroupId,
    read: bool,
}

/// Discussions a user can see in a forum.
enum DiscussionScope {
    All,
    /// All-participant discussions plus those of these groups.
    Groups(Vec<GroupId>),
}

fn unread_cutoff(now: i64, old_post_days: i64) -> i64 {
    now - old_post_days * SECONDS_PER_DAY
}

fn unread_posts(posts: &[ForumPost], cutoff: i64, scope: &DiscussionScope) -> usize {
    posts
        .iter()
        .filter(|post| !post.read && post.modified >= cutoff)
        .filter(|post| match scope {
            DiscussionScope::All => true,
            DiscussionScope::Groups(group_ids) => {
                post.group_id == ALL_PARTICIPANTS || group_ids.contains(&post.group_id)
            }
        })
        .count()
}

/// Some role allows the capability and none prohibits it.
fn permission_granted(permissions: &[i64]) -> bool {
    permissions.contains(&CAP_ALLOW) && !permissions.contains(&CAP_PROHIBIT)
}

fn counts_attempt(state: &str, preview: i16) -> bool {
    preview == 0 && state == "finished"
}

fn single_group(group_ids: &[GroupId]) -> Option<GroupId> {
    match group_ids {
        [group_id] => Some(*group_id),
        _ => None,
    }
}

struct SubmissionRow {
    id: i64,
    assignment: i64,
    user_id: UserId,
    status: Option<String>,
    modified: Option<i64>,
    attempt_number: i64,
}

struct GradeRow {
    assignment: i64,
    user_id: UserId,
    attempt_number: i64,
    grade: Option<f64>,
    time_modified: Option<i64>,
}

/// Pairs each submission with the grade for the same user and attempt.
fn join_grades(submissions: Vec<SubmissionRow>, grades: Vec<GradeRow>) -> Vec<GradingCandidate> {
    let by_attempt: HashMap<(i64, UserId, i64), GradeRecord> = grades
        .into_iter()
        .map(|g| {
            (
                (g.assignment, g.user_id, g.attempt_number),
                GradeRecord {
                    grade: g.grade,
                    time_modified: g.time_modified,
                },
            )
        })
        .collect();

    submissions
        .into_iter()
        .map(|s| GradingCandidate {
            submission_id: s.id,
            assignment: s.assignment,
            user_id: s.user_id,
            status: s
                .status
                .as_deref()
                .map_or(SubmissionStatus::New, SubmissionStatus::from_db),
            submission_modified: s.modified,
            grade: by_attempt.get(&(s.assignment, s.user_id, s.attempt_number)).cloned(),
        })
        .collect()
}
