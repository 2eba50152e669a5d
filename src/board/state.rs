//! Client-side task store and its derived view.
//!
//! `BoardState` holds at most one snapshot per task id. Every change goes
//! through a named entry point here; the controller decides which ones to
//! call and when.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::{Task, TaskId, TaskPatch, TaskStatus};

/// Which columns the view shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StatusFilter {
    #[default]
    All,
    Only(TaskStatus),
}

impl StatusFilter {
    pub fn admits(&self, status: TaskStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(only) => *only == status,
        }
    }
}

impl std::fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusFilter::All => write!(f, "All"),
            StatusFilter::Only(status) => write!(f, "{}", status),
        }
    }
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(StatusFilter::All);
        }
        s.parse::<TaskStatus>().map(StatusFilter::Only)
    }
}

/// A position on the board: a column and an index into it as rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub status: TaskStatus,
    pub index: usize,
}

impl Slot {
    pub fn new(status: TaskStatus, index: usize) -> Self {
        Self { status, index }
    }
}

/// Scratch copy of the mutable fields of the task being edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditDraft {
    pub id: TaskId,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
}

impl EditDraft {
    pub fn from_task(task: &Task) -> Self {
        Self {
            id: task.id,
            title: task.title.clone(),
            description: task.description.clone(),
            status: task.status,
        }
    }

    pub fn to_patch(&self) -> TaskPatch {
        TaskPatch {
            title: Some(self.title.clone()),
            description: Some(self.description.clone()),
            status: Some(self.status),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BoardState {
    tasks: HashMap<TaskId, Task>,
    query: String,
    filter: StatusFilter,
    editing: Option<EditDraft>,
}

impl BoardState {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Mutation entry points ───────────────────────────────────────

    /// Replace the whole task list, e.g. after the initial fetch.
    pub fn load(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks.into_iter().map(|t| (t.id, t)).collect();
        if let Some(draft) = &self.editing
            && !self.tasks.contains_key(&draft.id)
        {
            self.editing = None;
        }
    }

    /// Insert only if absent. Returns true when the task was new.
    pub fn insert_if_absent(&mut self, task: Task) -> bool {
        if self.tasks.contains_key(&task.id) {
            return false;
        }
        self.tasks.insert(task.id, task);
        true
    }

    /// Insert or overwrite.
    pub fn upsert(&mut self, task: Task) {
        self.tasks.insert(task.id, task);
    }

    /// Overwrite only if present; a task that is gone stays gone.
    /// Returns false when there was nothing to overwrite.
    pub fn overwrite_if_present(&mut self, task: Task) -> bool {
        match self.tasks.get_mut(&task.id) {
            Some(slot) => {
                *slot = task;
                true
            }
            None => false,
        }
    }

    /// Remove `id`, closing its editor if open. Returns the removed task.
    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        if self.editing.as_ref().is_some_and(|d| d.id == id) {
            self.editing = None;
        }
        self.tasks.remove(&id)
    }

    /// Set the status of `id` and return the previous one.
    pub fn set_status(&mut self, id: TaskId, status: TaskStatus) -> Option<TaskStatus> {
        let task = self.tasks.get_mut(&id)?;
        Some(std::mem::replace(&mut task.status, status))
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    pub fn set_filter(&mut self, filter: StatusFilter) {
        self.filter = filter;
    }

    // ── Editing draft ───────────────────────────────────────────────

    /// Open the editor on `id`, replacing any draft in progress.
    pub fn begin_edit(&mut self, id: TaskId) -> bool {
        match self.tasks.get(&id) {
            Some(task) => {
                self.editing = Some(EditDraft::from_task(task));
                true
            }
            None => false,
        }
    }

    pub fn draft_mut(&mut self) -> Option<&mut EditDraft> {
        self.editing.as_mut()
    }

    pub fn cancel_edit(&mut self) -> Option<EditDraft> {
        self.editing.take()
    }

    /// Close the editor if it is open on `id`.
    pub fn close_edit(&mut self, id: TaskId) {
        if self.editing.as_ref().is_some_and(|d| d.id == id) {
            self.editing = None;
        }
    }

    // ── Reads ───────────────────────────────────────────────────────

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn filter(&self) -> StatusFilter {
        self.filter
    }

    pub fn editing(&self) -> Option<&EditDraft> {
        self.editing.as_ref()
    }

    /// Every task, ordered by creation time then id.
    pub fn all(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks
    }

    /// Tasks passing the status filter and the search query, in board order.
    pub fn visible(&self) -> Vec<&Task> {
        let needle = self.query.trim().to_lowercase();
        self.all()
            .into_iter()
            .filter(|t| self.filter.admits(t.status) && t.matches_query(&needle))
            .collect()
    }

    /// One column of the visible view.
    pub fn column(&self, status: TaskStatus) -> Vec<&Task> {
        self.visible()
            .into_iter()
            .filter(|t| t.status == status)
            .collect()
    }

    /// The task rendered at `slot`, if any.
    pub fn task_at(&self, slot: Slot) -> Option<&Task> {
        self.column(slot.status).get(slot.index).copied()
    }

    /// Where `id` is rendered, if it is visible.
    pub fn slot_of(&self, id: TaskId) -> Option<Slot> {
        let task = self.tasks.get(&id)?;
        let index = self
            .column(task.status)
            .iter()
            .position(|t| t.id == id)?;
        Some(Slot::new(task.status, index))
    }
}
