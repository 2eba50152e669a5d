//! Plain-terminal rendering of a `BoardView`.

use console::style;
use std::fmt::Write;

use super::controller::{Notice, NoticeKind};
use super::runtime::{BoardView, Column};
use super::state::StatusFilter;
use crate::models::{Task, TaskId, TaskStatus};

/// Length of the id prefix shown on the board; enough to address a task.
pub const SHORT_ID_LEN: usize = 8;

pub fn short_id(id: TaskId) -> String {
    id.simple().to_string()[..SHORT_ID_LEN].to_string()
}

/// Tasks whose id starts with `key`. Accepts hyphenated or simple ids, in
/// any case.
pub fn match_id_prefix<'a>(tasks: impl IntoIterator<Item = &'a Task>, key: &str) -> Vec<&'a Task> {
    let key: String = key
        .trim()
        .chars()
        .filter(|c| *c != '-')
        .collect::<String>()
        .to_lowercase();
    if key.is_empty() {
        return Vec::new();
    }
    tasks
        .into_iter()
        .filter(|t| t.id.simple().to_string().starts_with(&key))
        .collect()
}

fn column_heading(column: &Column) -> String {
    let label = match column.status {
        TaskStatus::ToDo => style(column.status.as_str()).yellow().bold(),
        TaskStatus::InProgress => style(column.status.as_str()).cyan().bold(),
        TaskStatus::Done => style(column.status.as_str()).green().bold(),
    };
    format!("{} ({})", label, column.tasks.len())
}

fn task_lines(task: &Task, out: &mut String) {
    let _ = writeln!(out, "  {}  {}", style(short_id(task.id)).dim(), task.title);
    if let Some(description) = task.description.as_deref().filter(|d| !d.is_empty()) {
        let _ = writeln!(out, "            {}", style(description).dim());
    }
}

pub fn render_notice(notice: &Notice) -> String {
    let tag = match notice.kind {
        NoticeKind::Failure => style("error").red().bold(),
        NoticeKind::AuthRequired => style("login required").red().bold(),
        NoticeKind::ChannelLost => style("offline").yellow().bold(),
    };
    format!("{}: {}", tag, notice.message)
}

/// The whole board: a header line, one section per column, then notices.
pub fn render_board(view: &BoardView) -> String {
    let mut out = String::new();

    let shown: usize = view.columns.iter().map(|c| c.tasks.len()).sum();
    let mut header = format!("{} of {} task(s)", shown, view.total);
    if view.filter != StatusFilter::All {
        let _ = write!(header, ", status: {}", view.filter);
    }
    if !view.query.is_empty() {
        let _ = write!(header, ", search: \"{}\"", view.query);
    }
    if view.live {
        let _ = write!(header, " {}", style("[live]").green());
    }
    let _ = writeln!(out, "{}", header);

    for column in &view.columns {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", column_heading(column));
        if column.tasks.is_empty() {
            let _ = writeln!(out, "  {}", style("(empty)").dim());
        }
        for task in &column.tasks {
            task_lines(task, &mut out);
        }
    }

    if !view.notices.is_empty() {
        let _ = writeln!(out);
        for notice in &view.notices {
            let _ = writeln!(out, "{}", render_notice(notice));
        }
    }

    out
}

/// Detail view of a single task.
pub fn render_task(task: &Task) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", style(&task.title).bold());
    let _ = writeln!(out, "  id:      {}", task.id);
    let _ = writeln!(out, "  status:  {}", task.status);
    if let Some(description) = &task.description {
        let _ = writeln!(out, "  details: {}", description);
    }
    let _ = writeln!(out, "  created: {}", task.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "  updated: {}", task.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    out
}
