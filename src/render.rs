use std::sync::LazyLock;

use anyhow::Context;
use askama::Template;
use regex::Regex;

use crate::lang::Strings;
use crate::models::{Course, CourseId, PendingCourseSummary};

#[derive(Template)]
#[template(path = "courseoverview.html")]
struct CourseOverviewTemplate<'a> {
    data: &'a PendingCourseSummary,
    strings: &'a Strings,
    wwwroot: &'a str,
    course_name: &'a str,
    unread_label: &'a str,
}

struct ScriptCourse {
    course_id: CourseId,
    /// The fragment as a JavaScript string literal.
    data: String,
}

#[derive(Template)]
#[template(path = "js.js", escape = "none")]
struct ScriptTemplate<'a> {
    courses: &'a [ScriptCourse],
}

pub struct Renderer {
    strings: Strings,
    wwwroot: String,
}

impl Renderer {
    pub fn new(strings: Strings, wwwroot: &str) -> Self {
        Self {
            strings,
            wwwroot: wwwroot.trim_end_matches('/').to_string(),
        }
    }

    /// Renders one course's counts as a single line of markup.
    pub fn course_fragment(
        &self,
        course: &Course,
        summary: &PendingCourseSummary,
    ) -> anyhow::Result<String> {
        let html = CourseOverviewTemplate {
            data: summary,
            strings: &self.strings,
            wwwroot: &self.wwwroot,
            course_name: &course.fullname,
            unread_label: self.strings.unread_label(summary.unread_forums),
        }
        .render()
        .with_context(|| format!("failed to render overview for course {}", course.id))?;

        Ok(collapse_whitespace(&html))
    }

    pub fn script(&self, fragments: &[(CourseId, String)]) -> anyhow::Result<String> {
        let mut courses = Vec::with_capacity(fragments.len());
        for (course_id, fragment) in fragments {
            let literal = serde_json::to_string(fragment)?.replace("</", "<\\/");
            courses.push(ScriptCourse {
                course_id: *course_id,
                data: literal,
            });
        }

        let script = ScriptTemplate { courses: &courses }
            .render()
            .context("failed to render overview script")?;
        Ok(script)
    }
}

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Replaces every run of whitespace with a single space.
pub fn collapse_whitespace(input: &str) -> String {
    WHITESPACE.replace_all(input, " ").into_owned()
}
