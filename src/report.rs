use std::fmt::Write as _;

use serde::Serialize;

use crate::models::{Course, PendingCourseSummary};

#[derive(Serialize)]
struct CsvRow<'a> {
    course_id: i64,
    shortname: &'a str,
    fullname: &'a str,
    visible: bool,
    is_student: bool,
    is_teacher: bool,
    unread_forums: usize,
    student_pending_assign: usize,
    student_pending_quiz: usize,
    teacher_pending_assign: usize,
    teacher_pending_quiz: usize,
}

pub fn write_csv<W: std::io::Write>(
    writer: W,
    summaries: &[(Course, PendingCourseSummary)],
) -> anyhow::Result<usize> {
    let mut csv = csv::Writer::from_writer(writer);

    for (course, summary) in summaries {
        csv.serialize(CsvRow {
            course_id: course.id,
            shortname: &course.shortname,
            fullname: &course.fullname,
            visible: course.visible,
            is_student: summary.is_student,
            is_teacher: summary.is_teacher,
            unread_forums: summary.unread_forums,
            student_pending_assign: summary.student_pending_assign,
            student_pending_quiz: summary.student_pending_quiz,
            teacher_pending_assign: summary.teacher_pending_assign,
            teacher_pending_quiz: summary.teacher_pending_quiz,
        })?;
    }

    csv.flush()?;
    Ok(summaries.len())
}

pub fn to_json(summaries: &[(Course, PendingCourseSummary)]) -> anyhow::Result<String> {
    let values: Vec<&PendingCourseSummary> = summaries.iter().map(|(_, s)| s).collect();
    Ok(serde_json::to_string_pretty(&values)?)
}

/// One line per course, for terminal output.
pub fn build_text(summaries: &[(Course, PendingCourseSummary)]) -> String {
    let mut output = String::new();

    if summaries.is_empty() {
        let _ = writeln!(output, "No active enrolments.");
        return output;
    }

    for (course, summary) in summaries {
        let _ = write!(
            output,
            "- {} ({}): {} unread",
            course.fullname, course.shortname, summary.unread_forums
        );
        if summary.is_student {
            let _ = write!(
                output,
                ", {} assignments and {} quizzes to do",
                summary.student_pending_assign, summary.student_pending_quiz
            );
        }
        if summary.is_teacher {
            let _ = write!(
                output,
                ", {} submissions to grade and {} quizzes to review",
                summary.teacher_pending_assign, summary.teacher_pending_quiz
            );
        }
        let _ = writeln!(output);
    }

    output
}
