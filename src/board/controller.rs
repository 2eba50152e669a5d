//! Mutation policy for the board.
//!
//! Moves are optimistic: the status changes locally before the service is
//! asked, and is reverted if the service refuses. Every other mutation is
//! confirm-first and only touches local state once the service has answered.
//! Realtime events are merged with the same idempotent rules regardless of
//! how they interleave with direct responses.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::state::{BoardState, Slot, StatusFilter};
use crate::errors::ClientError;
use crate::models::{Task, TaskId, TaskPatch, TaskStatus};
use crate::service::ws::{ClientMessage, RealtimeMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeKind {
    /// A service call failed; local state was kept or rolled back.
    Failure,
    /// The credential is no longer accepted; the user must log in again.
    AuthRequired,
    /// The realtime channel gave up reconnecting.
    ChannelLost,
}

/// A user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    fn from_error(action: &str, err: &ClientError) -> Self {
        let kind = if err.is_auth() {
            NoticeKind::AuthRequired
        } else {
            NoticeKind::Failure
        };
        Notice {
            kind,
            message: format!("{} failed: {}", action, err),
        }
    }
}

/// An optimistic move awaiting the service's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveTicket {
    pub id: TaskId,
    pub from: TaskStatus,
    pub to: TaskStatus,
    /// The full update to send: every mutable field restated, status replaced.
    pub patch: TaskPatch,
}

#[derive(Debug, Default)]
pub struct BoardController {
    state: BoardState,
    notices: Vec<Notice>,
    pending_delete: Option<TaskId>,
    loaded: bool,
    /// Ids seen deleted; a late `created` for one of these is stale.
    deleted: HashSet<TaskId>,
}

impl BoardController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &BoardState {
        &self.state
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// True once the initial list has been answered, successfully or not.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn pending_delete(&self) -> Option<TaskId> {
        self.pending_delete
    }

    fn notify(&mut self, action: &str, err: &ClientError) {
        let notice = Notice::from_error(action, err);
        tracing::warn!(kind = ?notice.kind, message = %notice.message, "board notice");
        self.notices.push(notice);
    }

    // ── Initialization ──────────────────────────────────────────────

    /// Apply the answer to the initial (or a refreshing) list call. Failure
    /// keeps whatever the board already holds and records a notice.
    pub fn finish_load(&mut self, result: Result<Vec<Task>, ClientError>) {
        self.loaded = true;
        match result {
            Ok(tasks) => {
                tracing::debug!(count = tasks.len(), "board loaded");
                self.state.load(tasks);
            }
            Err(err) => self.notify("Loading tasks", &err),
        }
    }

    // ── Create (confirm-first) ──────────────────────────────────────

    /// Insert the created task. A realtime `created` may already have
    /// inserted it, and a realtime `deleted` may already have removed it.
    pub fn finish_create(&mut self, result: Result<Task, ClientError>) {
        match result {
            Ok(task) if self.deleted.contains(&task.id) => {
                tracing::debug!(task_id = %task.id, "create confirmed for a task already deleted");
            }
            Ok(task) => self.state.upsert(task),
            Err(err) => self.notify("Creating task", &err),
        }
    }

    // ── Update (confirm-first) ──────────────────────────────────────

    pub fn finish_update(&mut self, id: TaskId, result: Result<Task, ClientError>) {
        match result {
            Ok(task) => {
                if !self.state.overwrite_if_present(task) {
                    tracing::warn!(task_id = %id, "update confirmed for a task no longer on the board");
                }
                self.state.close_edit(id);
            }
            Err(err) => self.notify("Updating task", &err),
        }
    }

    pub fn begin_edit(&mut self, id: TaskId) -> bool {
        self.state.begin_edit(id)
    }

    pub fn edit_title(&mut self, title: impl Into<String>) {
        if let Some(draft) = self.state.draft_mut() {
            draft.title = title.into();
        }
    }

    pub fn edit_description(&mut self, description: Option<String>) {
        if let Some(draft) = self.state.draft_mut() {
            draft.description = description;
        }
    }

    pub fn edit_status(&mut self, status: TaskStatus) {
        if let Some(draft) = self.state.draft_mut() {
            draft.status = status;
        }
    }

    pub fn cancel_edit(&mut self) {
        self.state.cancel_edit();
    }

    /// The update to send for the open draft. The draft stays open until
    /// the service confirms.
    pub fn save_edit(&mut self) -> Option<(TaskId, TaskPatch)> {
        let draft = self.state.editing()?;
        Some((draft.id, draft.to_patch()))
    }

    // ── Delete (confirm-first, after an explicit confirmation) ──────

    /// Ask for confirmation before deleting `id`.
    pub fn request_delete(&mut self, id: TaskId) -> bool {
        if self.state.get(id).is_none() {
            return false;
        }
        self.pending_delete = Some(id);
        true
    }

    /// The id to delete, once the user has confirmed.
    pub fn confirm_delete(&mut self) -> Option<TaskId> {
        self.pending_delete.take()
    }

    pub fn cancel_delete(&mut self) {
        self.pending_delete = None;
    }

    pub fn finish_delete(&mut self, id: TaskId, result: Result<(), ClientError>) {
        match result {
            Ok(()) => self.forget(id),
            Err(err) => self.notify("Deleting task", &err),
        }
    }

    // ── Move (optimistic) ───────────────────────────────────────────

    /// Resolve the dragged task and apply its new status immediately.
    ///
    /// Returns `None` when nothing should be sent: no task at `source`, a
    /// drop outside any column, or a drop within the same column (columns
    /// are ordered by creation time, so there is no position to persist).
    pub fn begin_move(&mut self, source: Slot, dest: Option<Slot>) -> Option<MoveTicket> {
        let dest = dest?;
        if dest.status == source.status {
            return None;
        }
        let task = self.state.task_at(source)?;
        let ticket = MoveTicket {
            id: task.id,
            from: task.status,
            to: dest.status,
            patch: TaskPatch::full_with_status(task, dest.status),
        };
        self.state.set_status(ticket.id, ticket.to);
        Some(ticket)
    }

    /// Move a known task by id; the CLI addresses tasks this way.
    pub fn begin_move_task(&mut self, id: TaskId, to: TaskStatus) -> Option<MoveTicket> {
        let task = self.state.get(id)?;
        if task.status == to {
            return None;
        }
        let ticket = MoveTicket {
            id,
            from: task.status,
            to,
            patch: TaskPatch::full_with_status(task, to),
        };
        self.state.set_status(id, to);
        Some(ticket)
    }

    /// Settle a move. On success returns the advisory message to publish;
    /// on failure restores the pre-move status.
    pub fn finish_move(
        &mut self,
        ticket: &MoveTicket,
        result: Result<Task, ClientError>,
    ) -> Option<ClientMessage> {
        match result {
            Ok(task) => {
                let status = task.status;
                if !self.state.overwrite_if_present(task) {
                    tracing::warn!(task_id = %ticket.id, "move confirmed for a task no longer on the board");
                }
                Some(ClientMessage::TaskMoved {
                    id: ticket.id,
                    status,
                })
            }
            Err(err) => {
                self.state.set_status(ticket.id, ticket.from);
                self.notify("Moving task", &err);
                None
            }
        }
    }

    // ── Realtime reconciliation ─────────────────────────────────────

    pub fn apply_realtime(&mut self, msg: RealtimeMessage) {
        match msg {
            RealtimeMessage::TaskCreated(task) => {
                if !self.deleted.contains(&task.id) {
                    self.state.insert_if_absent(task);
                }
            }
            RealtimeMessage::TaskUpdated(task) => {
                let id = task.id;
                if !self.state.overwrite_if_present(task) {
                    tracing::warn!(task_id = %id, "ignoring update for unknown task");
                }
            }
            RealtimeMessage::TaskDeleted(id) => self.forget(id),
        }
    }

    fn forget(&mut self, id: TaskId) {
        self.deleted.insert(id);
        self.state.remove(id);
    }

    pub fn channel_lost(&mut self, reason: &str) {
        self.notices.push(Notice {
            kind: NoticeKind::ChannelLost,
            message: format!("Live updates unavailable: {}", reason),
        });
    }

    // ── View controls ───────────────────────────────────────────────

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.state.set_query(query);
    }

    pub fn set_filter(&mut self, filter: StatusFilter) {
        self.state.set_filter(filter);
    }
}
