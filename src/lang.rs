/// User-facing strings for the overview fragments.
#[derive(Debug, Clone)]
pub struct Strings {
    pub plugin_name: &'static str,
    pub pending_assignments: &'static str,
    pub pending_assignments_teacher: &'static str,
    pub pending_quizzes: &'static str,
    pub pending_quizzes_teacher: &'static str,
    pub one_post_unread: &'static str,
    pub many_posts_unread: &'static str,
}

impl Strings {
    pub fn english() -> Self {
        Self {
            plugin_name: "Local course overview",
            pending_assignments: "Pending assignments",
            pending_assignments_teacher: "Assignments pending to grade",
            pending_quizzes: "Pending quizzes",
            pending_quizzes_teacher: "Quizzes pending to review",
            one_post_unread: "unread in",
            many_posts_unread: "unread in",
        }
    }

    pub fn unread_label(&self, count: usize) -> &'static str {
        if count == 1 {
            self.one_post_unread
        } else {
            self.many_posts_unread
        }
    }
}
