use crate::models::{ContextId, UserId};
use crate::platform::{Archetype, Platform};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CourseRoles {
    pub learner: bool,
    pub grader: bool,
}

pub async fn has_role<P: Platform>(
    platform: &P,
    user_id: UserId,
    context_id: ContextId,
    archetype: Archetype,
) -> anyhow::Result<bool> {
    platform.has_archetype(user_id, context_id, archetype).await
}

/// Learners hold a student role; graders hold either teacher role.
pub async fn classify<P: Platform>(
    platform: &P,
    user_id: UserId,
    context_id: ContextId,
) -> anyhow::Result<CourseRoles> {
    let learner = has_role(platform, user_id, context_id, Archetype::Student).await?;
    let grader = has_role(platform, user_id, context_id, Archetype::Teacher).await?
        || has_role(platform, user_id, context_id, Archetype::EditingTeacher).await?;

    Ok(CourseRoles { learner, grader })
}
