use crate::models::{Course, PendingCourseSummary, UserId};
use crate::pending;
use crate::platform::Platform;
use crate::render::Renderer;
use crate::roles;

pub const DASHBOARD_PAGE_TYPE: &str = "my-index";

/// The page being rendered.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub page_type: String,
    pub user_id: Option<UserId>,
    pub now: i64,
}

/// Collects scripts to be emitted with the page response.
pub trait ScriptSink {
    fn js_init_code(&mut self, code: String, on_dom_ready: bool);
}

#[derive(Debug, Clone, Default)]
pub struct PageRequirements {
    pub init_code: Vec<InitCode>,
}

#[derive(Debug, Clone)]
pub struct InitCode {
    pub code: String,
    pub on_dom_ready: bool,
}

impl ScriptSink for PageRequirements {
    fn js_init_code(&mut self, code: String, on_dom_ready: bool) {
        self.init_code.push(InitCode { code, on_dom_ready });
    }
}

pub async fn course_summary<P: Platform>(
    platform: &P,
    course: &Course,
    user_id: UserId,
    now: i64,
) -> anyhow::Result<PendingCourseSummary> {
    let mut summary = PendingCourseSummary::for_course(course.id);
    summary.unread_forums = pending::count_pending_forum(platform, course, user_id, now).await?;

    let context_id = platform.course_context(course.id).await?;
    let course_roles = roles::classify(platform, user_id, context_id).await?;

    if course_roles.learner {
        summary.is_student = true;
        summary.student_pending_assign =
            pending::count_student_pending_assign(platform, course, user_id, now).await?;
        summary.student_pending_quiz =
            pending::count_student_pending_quiz(platform, course, user_id, now).await?;
    }

    if course_roles.grader {
        summary.is_teacher = true;
        summary.teacher_pending_assign =
            pending::count_teacher_pending_assign(platform, course, user_id, now).await?;
        summary.teacher_pending_quiz =
            pending::count_teacher_pending_quiz(platform, course, user_id, now).await?;
    }

    tracing::debug!(
        course = course.id,
        unread = summary.unread_forums,
        student = summary.is_student,
        teacher = summary.is_teacher,
        "course summary ready"
    );
    Ok(summary)
}

/// Summaries for every course the user is enrolled in, paired with the course.
pub async fn collect_summaries<P: Platform>(
    platform: &P,
    user_id: UserId,
    now: i64,
) -> anyhow::Result<Vec<(Course, PendingCourseSummary)>> {
    let courses = platform.enrolled_courses(user_id, now).await?;
    let mut summaries = Vec::with_capacity(courses.len());

    for course in courses {
        let summary = course_summary(platform, &course, user_id, now).await?;
        summaries.push((course, summary));
    }

    Ok(summaries)
}

/// Footer hook: queues the overview script on dashboard renders for a
/// signed-in user and does nothing on any other page.
pub async fn before_footer<P: Platform, S: ScriptSink>(
    page: &PageRequest,
    dashboard_page_type: &str,
    platform: &P,
    renderer: &Renderer,
    sink: &mut S,
) -> anyhow::Result<()> {
    if page.page_type != dashboard_page_type {
        return Ok(());
    }
    let Some(user_id) = page.user_id else {
        tracing::debug!("no signed-in user, skipping course overview");
        return Ok(());
    };

    let summaries = collect_summaries(platform, user_id, page.now).await?;
    let mut fragments = Vec::with_capacity(summaries.len());
    for (course, summary) in &summaries {
        fragments.push((course.id, renderer.course_fragment(course, summary)?));
    }

    let script = renderer.script(&fragments)?;
    sink.js_init_code(script, true);
    tracing::debug!(user = user_id, courses = fragments.len(), "course overview queued");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::Strings;
    use crate::memory::MemoryPlatform;
    use crate::models::SubmissionStatus;
    use crate::platform::{Archetype, Capability};

    const NOW: i64 = 1_700_000_000;

    fn learner_site() -> MemoryPlatform {
        let mut platform = MemoryPlatform::default();
        platform.add_course(1);
        platform.enrol(5, 1);
        platform.assign_archetype(5, 1, Archetype::Student);
        let assign = platform.add_assignment(MemoryPlatform::assignment_template(0, 1));
        platform.grant_module(5, assign, Capability::AssignSubmit);
        platform.add_quiz(1, NOW - 100, NOW + 100);
        platform
    }

    fn dashboard(user_id: Option<UserId>) -> PageRequest {
        PageRequest {
            page_type: DASHBOARD_PAGE_TYPE.to_string(),
            user_id,
            now: NOW,
        }
    }

    #[tokio::test]
    async fn learner_with_open_work_sees_both_counts() {
        let platform = learner_site();
        let summaries = collect_summaries(&platform, 5, NOW).await.unwrap();

        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0].1;
        assert_eq!(
            *summary,
            PendingCourseSummary {
                course_id: 1,
                is_student: true,
                is_teacher: false,
                unread_forums: 0,
                student_pending_assign: 1,
                student_pending_quiz: 1,
                teacher_pending_assign: 0,
                teacher_pending_quiz: 0,
            }
        );
    }

    #[tokio::test]
    async fn roles_do_not_carry_over_between_courses() {
        let mut platform = learner_site();
        platform.add_course(2);
        platform.enrol(5, 2);
        platform.assign_archetype(5, 2, Archetype::EditingTeacher);
        let assign = platform.add_assignment(MemoryPlatform::assignment_template(0, 2));
        platform.grant_module(5, assign, Capability::AssignGrade);
        platform.enrol(6, 2);
        platform.grant_module(6, assign, Capability::AssignView);
        platform.submit(assign, 6, SubmissionStatus::Submitted, NOW - 50);

        let summaries = collect_summaries(&platform, 5, NOW).await.unwrap();
        assert_eq!(summaries.len(), 2);

        let learner = &summaries[0].1;
        assert!(learner.is_student && !learner.is_teacher);
        assert_eq!(learner.teacher_pending_assign, 0);

        let teacher = &summaries[1].1;
        assert!(!teacher.is_student && teacher.is_teacher);
        assert_eq!(teacher.student_pending_assign, 0);
        assert_eq!(teacher.teacher_pending_assign, 1);
    }

    #[tokio::test]
    async fn only_enrolled_courses_are_summarised() {
        let mut platform = learner_site();
        platform.add_course(3);

        let summaries = collect_summaries(&platform, 5, NOW).await.unwrap();
        let ids: Vec<_> = summaries.iter().map(|(course, _)| course.id).collect();
        assert_eq!(ids, vec![1]);
        assert!(collect_summaries(&platform, 99, NOW).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn footer_hook_queues_one_script_on_the_dashboard() {
        let platform = learner_site();
        let renderer = Renderer::new(Strings::english(), "");
        let mut sink = PageRequirements::default();

        before_footer(&dashboard(Some(5)), DASHBOARD_PAGE_TYPE, &platform, &renderer, &mut sink)
            .await
            .unwrap();

        assert_eq!(sink.init_code.len(), 1);
        let init = &sink.init_code[0];
        assert!(init.on_dom_ready);
        assert!(init.code.contains("course_id: 1,"));
        assert!(init.code.contains("Pending quizzes"));
    }

    #[tokio::test]
    async fn footer_hook_ignores_other_pages_and_guests() {
        let platform = learner_site();
        let renderer = Renderer::new(Strings::english(), "");
        let mut sink = PageRequirements::default();

        let course_page = PageRequest {
            page_type: "course-view-topics".to_string(),
            ..dashboard(Some(5))
        };
        before_footer(&course_page, DASHBOARD_PAGE_TYPE, &platform, &renderer, &mut sink)
            .await
            .unwrap();
        before_footer(&dashboard(None), DASHBOARD_PAGE_TYPE, &platform, &renderer, &mut sink)
            .await
            .unwrap();

        assert!(sink.init_code.is_empty());
    }
}
