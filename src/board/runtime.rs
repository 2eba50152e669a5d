//! The board's single timeline.
//!
//! One task owns the `BoardController` and handles, one at a time: user
//! commands, service completions, realtime events and the search debounce
//! timer. Service calls run concurrently in a `FuturesUnordered`, so a slow
//! request only delays its own completion. After every step a fresh
//! `BoardView` is published on a watch channel.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};

use super::client::TaskApi;
use super::controller::{BoardController, MoveTicket, Notice};
use super::realtime::RealtimeEvent;
use super::state::{EditDraft, Slot, StatusFilter};
use crate::errors::ClientError;
use crate::models::{NewTask, Task, TaskId, TaskPatch, TaskStatus};
use crate::service::ws::ClientMessage;

/// User intents accepted by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Refresh,
    Create(NewTask),
    Update { id: TaskId, patch: TaskPatch },
    BeginEdit(TaskId),
    EditTitle(String),
    EditDescription(Option<String>),
    EditStatus(TaskStatus),
    SaveEdit,
    CancelEdit,
    RequestDelete(TaskId),
    ConfirmDelete,
    CancelDelete,
    /// Drag-and-drop: `dest` is `None` when dropped outside any column.
    Move { source: Slot, dest: Option<Slot> },
    MoveTask { id: TaskId, to: TaskStatus },
    /// A keystroke in the search box; committed after the debounce window.
    SearchInput(String),
    /// Set the query immediately.
    SetQuery(String),
    SetFilter(StatusFilter),
}

enum Completion {
    Listed(Result<Vec<Task>, ClientError>),
    Created(Result<Task, ClientError>),
    Updated(TaskId, Result<Task, ClientError>),
    Deleted(TaskId, Result<(), ClientError>),
    Moved(MoveTicket, Result<Task, ClientError>),
}

type InFlight = FuturesUnordered<BoxFuture<'static, Completion>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub status: TaskStatus,
    pub tasks: Vec<Task>,
}

/// Snapshot of everything a front end needs to draw the board.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BoardView {
    /// Visible tasks grouped by the columns the filter admits
    pub columns: Vec<Column>,
    /// Tasks on the board regardless of filter and query
    pub total: usize,
    pub query: String,
    pub filter: StatusFilter,
    pub editing: Option<EditDraft>,
    pub pending_delete: Option<TaskId>,
    pub notices: Vec<Notice>,
    pub in_flight: usize,
    pub pending_search: bool,
    pub loaded: bool,
    /// Realtime channel currently connected
    pub live: bool,
    /// Commands processed so far
    pub handled: u64,
}

impl BoardView {
    pub fn column(&self, status: TaskStatus) -> Option<&Column> {
        self.columns.iter().find(|c| c.status == status)
    }

    pub fn find(&self, id: TaskId) -> Option<&Task> {
        self.columns
            .iter()
            .flat_map(|c| c.tasks.iter())
            .find(|t| t.id == id)
    }
}

struct SearchDebounce {
    timer: Pin<Box<Sleep>>,
    pending: Option<String>,
    window: Duration,
}

impl SearchDebounce {
    fn new(window: Duration) -> Self {
        Self {
            timer: Box::pin(tokio::time::sleep(Duration::ZERO)),
            pending: None,
            window,
        }
    }

    /// Replace the pending query and restart the window.
    fn input(&mut self, query: String) {
        self.pending = Some(query);
        self.timer.as_mut().reset(Instant::now() + self.window);
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<RealtimeEvent>>) -> Option<RealtimeEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

pub struct BoardRuntime {
    api: Arc<dyn TaskApi>,
    controller: BoardController,
    debounce: Duration,
    outbound: Option<mpsc::Sender<ClientMessage>>,
    live: bool,
    was_live: bool,
    handled: u64,
}

impl BoardRuntime {
    pub fn new(api: Arc<dyn TaskApi>, debounce: Duration) -> Self {
        Self {
            api,
            controller: BoardController::new(),
            debounce,
            outbound: None,
            live: false,
            was_live: false,
            handled: 0,
        }
    }

    /// Where advisory `task:moved` messages go after a confirmed move.
    pub fn with_outbound(mut self, outbound: mpsc::Sender<ClientMessage>) -> Self {
        self.outbound = Some(outbound);
        self
    }

    pub fn spawn(self, events: Option<mpsc::Receiver<RealtimeEvent>>) -> BoardHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(BoardView::default());
        let task = tokio::spawn(self.run(commands_rx, events, view_tx));
        BoardHandle {
            commands: commands_tx,
            view: view_rx,
            sent: 0,
            task,
        }
    }

    /// Load the board, then process events until the command channel closes
    /// and every in-flight call has completed.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: Option<mpsc::Receiver<RealtimeEvent>>,
        view_tx: watch::Sender<BoardView>,
    ) -> BoardController {
        let mut in_flight = InFlight::new();
        let mut search = SearchDebounce::new(self.debounce);
        let mut commands_open = true;

        in_flight.push(self.list());
        self.publish(&view_tx, &in_flight, &search);

        loop {
            if !commands_open && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(cmd) => {
                        self.handled += 1;
                        self.handle(cmd, &mut in_flight, &mut search);
                    }
                    None => {
                        commands_open = false;
                        if let Some(query) = search.pending.take() {
                            self.controller.set_query(query);
                        }
                    }
                },

                Some(done) = in_flight.next(), if !in_flight.is_empty() => {
                    self.complete(done);
                }

                event = next_event(&mut events) => match event {
                    Some(event) => self.on_event(event, &mut in_flight),
                    None => events = None,
                },

                () = &mut search.timer, if search.pending.is_some() => {
                    if let Some(query) = search.pending.take() {
                        self.controller.set_query(query);
                    }
                }
            }

            self.publish(&view_tx, &in_flight, &search);
        }

        self.controller
    }

    fn publish(&self, view_tx: &watch::Sender<BoardView>, in_flight: &InFlight, search: &SearchDebounce) {
        let state = self.controller.state();
        let columns = TaskStatus::ALL
            .iter()
            .filter(|status| state.filter().admits(**status))
            .map(|status| Column {
                status: *status,
                tasks: state.column(*status).into_iter().cloned().collect(),
            })
            .collect();
        view_tx.send_replace(BoardView {
            columns,
            total: state.len(),
            query: state.query().to_string(),
            filter: state.filter(),
            editing: state.editing().cloned(),
            pending_delete: self.controller.pending_delete(),
            notices: self.controller.notices().to_vec(),
            in_flight: in_flight.len(),
            pending_search: search.pending.is_some(),
            loaded: self.controller.is_loaded(),
            live: self.live,
            handled: self.handled,
        });
    }

    fn list(&self) -> BoxFuture<'static, Completion> {
        let api = self.api.clone();
        async move { Completion::Listed(api.list().await) }.boxed()
    }

    fn update(&self, id: TaskId, patch: TaskPatch) -> BoxFuture<'static, Completion> {
        let api = self.api.clone();
        async move { Completion::Updated(id, api.update(id, patch).await) }.boxed()
    }

    fn handle(&mut self, cmd: Command, in_flight: &mut InFlight, search: &mut SearchDebounce) {
        match cmd {
            Command::Refresh => in_flight.push(self.list()),
            Command::Create(new_task) => {
                let api = self.api.clone();
                in_flight.push(async move { Completion::Created(api.create(new_task).await) }.boxed());
            }
            Command::Update { id, patch } => in_flight.push(self.update(id, patch)),
            Command::BeginEdit(id) => {
                if !self.controller.begin_edit(id) {
                    tracing::debug!(task_id = %id, "cannot edit a task that is not on the board");
                }
            }
            Command::EditTitle(title) => self.controller.edit_title(title),
            Command::EditDescription(description) => self.controller.edit_description(description),
            Command::EditStatus(status) => self.controller.edit_status(status),
            Command::SaveEdit => {
                if let Some((id, patch)) = self.controller.save_edit() {
                    in_flight.push(self.update(id, patch));
                }
            }
            Command::CancelEdit => self.controller.cancel_edit(),
            Command::RequestDelete(id) => {
                if !self.controller.request_delete(id) {
                    tracing::debug!(task_id = %id, "cannot delete a task that is not on the board");
                }
            }
            Command::ConfirmDelete => {
                if let Some(id) = self.controller.confirm_delete() {
                    let api = self.api.clone();
                    in_flight.push(async move { Completion::Deleted(id, api.delete(id).await) }.boxed());
                }
            }
            Command::CancelDelete => self.controller.cancel_delete(),
            Command::Move { source, dest } => {
                if let Some(ticket) = self.controller.begin_move(source, dest) {
                    in_flight.push(self.send_move(ticket));
                }
            }
            Command::MoveTask { id, to } => {
                if let Some(ticket) = self.controller.begin_move_task(id, to) {
                    in_flight.push(self.send_move(ticket));
                }
            }
            Command::SearchInput(query) => search.input(query),
            Command::SetQuery(query) => {
                search.pending = None;
                self.controller.set_query(query);
            }
            Command::SetFilter(filter) => self.controller.set_filter(filter),
        }
    }

    fn send_move(&self, ticket: MoveTicket) -> BoxFuture<'static, Completion> {
        let api = self.api.clone();
        async move {
            let result = api.update(ticket.id, ticket.patch.clone()).await;
            Completion::Moved(ticket, result)
        }
        .boxed()
    }

    fn complete(&mut self, done: Completion) {
        match done {
            Completion::Listed(result) => self.controller.finish_load(result),
            Completion::Created(result) => self.controller.finish_create(result),
            Completion::Updated(id, result) => self.controller.finish_update(id, result),
            Completion::Deleted(id, result) => self.controller.finish_delete(id, result),
            Completion::Moved(ticket, result) => {
                let Some(advisory) = self.controller.finish_move(&ticket, result) else {
                    return;
                };
                if let Some(outbound) = &self.outbound
                    && outbound.try_send(advisory).is_err()
                {
                    tracing::debug!(task_id = %ticket.id, "advisory move not sent");
                }
            }
        }
    }

    fn on_event(&mut self, event: RealtimeEvent, in_flight: &mut InFlight) {
        match event {
            RealtimeEvent::Connected => {
                // Events emitted while disconnected are gone; resync.
                if self.was_live {
                    in_flight.push(self.list());
                }
                self.live = true;
                self.was_live = true;
            }
            RealtimeEvent::Disconnected(reason) => {
                tracing::debug!(%reason, "realtime channel disconnected");
                self.live = false;
            }
            RealtimeEvent::Message(msg) => self.controller.apply_realtime(msg),
            RealtimeEvent::Lost(reason) => {
                self.live = false;
                self.controller.channel_lost(&reason);
            }
        }
    }
}

/// Front-end side of a spawned runtime.
pub struct BoardHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<BoardView>,
    sent: u64,
    task: JoinHandle<BoardController>,
}

impl BoardHandle {
    pub fn send(&mut self, cmd: Command) -> Result<()> {
        self.commands
            .send(cmd)
            .map_err(|_| anyhow::anyhow!("Board runtime has stopped"))?;
        self.sent += 1;
        Ok(())
    }

    /// The latest published view.
    pub fn view(&self) -> BoardView {
        self.view.borrow().clone()
    }

    /// Wait for the next published view.
    pub async fn changed(&mut self) -> Result<BoardView> {
        self.view.changed().await.context("Board runtime has stopped")?;
        Ok(self.view.borrow_and_update().clone())
    }

    /// Wait until every command sent so far has been handled, no call is in
    /// flight and no search is pending.
    pub async fn settled(&mut self) -> Result<BoardView> {
        let sent = self.sent;
        let view = self
            .view
            .wait_for(|v| v.loaded && v.handled >= sent && v.in_flight == 0 && !v.pending_search)
            .await
            .context("Board runtime has stopped")?;
        Ok(view.clone())
    }

    /// Wait until every command sent so far has been handled.
    pub async fn handled(&mut self) -> Result<BoardView> {
        let sent = self.sent;
        let view = self
            .view
            .wait_for(|v| v.handled >= sent)
            .await
            .context("Board runtime has stopped")?;
        Ok(view.clone())
    }

    /// Close the command channel, let in-flight calls finish, and return
    /// the final controller.
    pub async fn shutdown(self) -> Result<BoardController> {
        drop(self.commands);
        self.task.await.context("Board runtime panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::controller::NoticeKind;
    use crate::service::ws::RealtimeMessage;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::oneshot;
    use uuid::Uuid;

    /// In-memory `TaskApi` with switchable failures and an optional gate
    /// that holds the next update until released.
    #[derive(Default)]
    struct MockTaskApi {
        tasks: Mutex<HashMap<TaskId, Task>>,
        fail_list: Mutex<bool>,
        reject_updates: Mutex<bool>,
        update_gate: Mutex<Option<oneshot::Receiver<()>>>,
    }

    impl MockTaskApi {
        fn with_gate(&self) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            *self.update_gate.lock().unwrap() = Some(rx);
            tx
        }
    }

    #[async_trait]
    impl TaskApi for MockTaskApi {
        async fn list(&self) -> Result<Vec<Task>, ClientError> {
            if *self.fail_list.lock().unwrap() {
                return Err(ClientError::Network("connection refused".into()));
            }
            Ok(self.tasks.lock().unwrap().values().cloned().collect())
        }

        async fn get(&self, id: TaskId) -> Result<Task, ClientError> {
            self.tasks
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or_else(|| ClientError::NotFound(id.to_string()))
        }

        async fn create(&self, new_task: NewTask) -> Result<Task, ClientError> {
            if new_task.title.trim().is_empty() {
                return Err(ClientError::Validation("title is required".into()));
            }
            let now = Utc::now();
            let task = Task {
                id: Uuid::new_v4(),
                title: new_task.title,
                description: new_task.description,
                status: new_task.status.unwrap_or_default(),
                owner_id: Uuid::nil(),
                created_at: now,
                updated_at: now,
            };
            self.tasks.lock().unwrap().insert(task.id, task.clone());
            Ok(task)
        }

        async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<Task, ClientError> {
            let gate = self.update_gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if *self.reject_updates.lock().unwrap() {
                return Err(ClientError::Unknown("internal error".into()));
            }
            let mut tasks = self.tasks.lock().unwrap();
            let task = tasks
                .get_mut(&id)
                .ok_or_else(|| ClientError::NotFound(id.to_string()))?;
            if let Some(title) = patch.title {
                task.title = title;
            }
            if let Some(description) = patch.description {
                task.description = description;
            }
            if let Some(status) = patch.status {
                task.status = status;
            }
            task.updated_at = Utc::now();
            Ok(task.clone())
        }

        async fn delete(&self, id: TaskId) -> Result<(), ClientError> {
            self.tasks
                .lock()
                .unwrap()
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| ClientError::NotFound(id.to_string()))
        }
    }

    fn start(api: Arc<MockTaskApi>) -> BoardHandle {
        BoardRuntime::new(api, Duration::from_millis(300)).spawn(None)
    }

    async fn create(handle: &mut BoardHandle, title: &str) -> Task {
        handle
            .send(Command::Create(NewTask {
                title: title.into(),
                ..NewTask::default()
            }))
            .unwrap();
        let view = handle.settled().await.unwrap();
        view.columns
            .iter()
            .flat_map(|c| c.tasks.iter())
            .find(|t| t.title == title)
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_move_rejected_rolls_back() {
        let api = Arc::new(MockTaskApi::default());
        let mut handle = start(api.clone());

        let a = create(&mut handle, "X").await;
        let view = handle.view();
        assert_eq!(view.total, 1);
        assert_eq!(view.column(TaskStatus::ToDo).unwrap().tasks, vec![a.clone()]);

        *api.reject_updates.lock().unwrap() = true;
        let release = api.with_gate();
        handle
            .send(Command::Move {
                source: Slot::new(TaskStatus::ToDo, 0),
                dest: Some(Slot::new(TaskStatus::Done, 0)),
            })
            .unwrap();

        let optimistic = handle.handled().await.unwrap();
        assert_eq!(optimistic.in_flight, 1);
        assert_eq!(optimistic.find(a.id).unwrap().status, TaskStatus::Done);

        release.send(()).unwrap();
        let settled = handle.settled().await.unwrap();
        assert_eq!(settled.find(a.id).unwrap().status, TaskStatus::ToDo);
        assert_eq!(settled.notices.len(), 1);
        assert_eq!(settled.notices[0].kind, NoticeKind::Failure);

        let controller = handle.shutdown().await.unwrap();
        assert_eq!(controller.state().len(), 1);
    }

    #[tokio::test]
    async fn test_events_interleave_with_in_flight_move() {
        let api = Arc::new(MockTaskApi::default());
        let (events_tx, events_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let mut handle = BoardRuntime::new(api.clone(), Duration::from_millis(300))
            .with_outbound(out_tx)
            .spawn(Some(events_rx));

        let a = create(&mut handle, "A").await;
        let release = api.with_gate();
        handle
            .send(Command::MoveTask {
                id: a.id,
                to: TaskStatus::InProgress,
            })
            .unwrap();
        handle.handled().await.unwrap();

        let mut peer = a.clone();
        peer.id = Uuid::new_v4();
        peer.title = "from a peer".into();
        events_tx
            .send(RealtimeEvent::Message(RealtimeMessage::TaskCreated(peer.clone())))
            .await
            .unwrap();
        let view = handle.changed().await.unwrap();
        assert_eq!(view.total, 2);
        assert_eq!(view.in_flight, 1);

        release.send(()).unwrap();
        let settled = handle.settled().await.unwrap();
        assert_eq!(settled.find(a.id).unwrap().status, TaskStatus::InProgress);
        assert_eq!(
            out_rx.recv().await,
            Some(ClientMessage::TaskMoved {
                id: a.id,
                status: TaskStatus::InProgress
            })
        );
    }

    #[tokio::test]
    async fn test_initial_load_failure_is_a_notice() {
        let api = Arc::new(MockTaskApi {
            fail_list: Mutex::new(true),
            ..MockTaskApi::default()
        });
        let mut handle = start(api);
        let view = handle.settled().await.unwrap();
        assert!(view.loaded);
        assert_eq!(view.total, 0);
        assert_eq!(view.notices[0].kind, NoticeKind::Failure);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_populated_board() {
        let api = Arc::new(MockTaskApi::default());
        let mut handle = start(api.clone());
        let a = create(&mut handle, "A").await;
        create(&mut handle, "B").await;

        *api.fail_list.lock().unwrap() = true;
        handle.send(Command::Refresh).unwrap();
        let view = handle.settled().await.unwrap();
        assert_eq!(view.total, 2);
        assert_eq!(view.find(a.id), Some(&a));
        assert_eq!(view.notices.len(), 1);
        assert_eq!(view.notices[0].kind, NoticeKind::Failure);
    }

    #[tokio::test]
    async fn test_failed_resync_after_reconnect_keeps_board() {
        let api = Arc::new(MockTaskApi::default());
        let (events_tx, events_rx) = mpsc::channel(8);
        let mut handle = BoardRuntime::new(api.clone(), Duration::from_millis(300)).spawn(Some(events_rx));
        let a = create(&mut handle, "A").await;

        events_tx.send(RealtimeEvent::Connected).await.unwrap();
        events_tx
            .send(RealtimeEvent::Disconnected("reset".into()))
            .await
            .unwrap();
        *api.fail_list.lock().unwrap() = true;
        events_tx.send(RealtimeEvent::Connected).await.unwrap();

        let view = handle
            .view
            .wait_for(|v| v.live && v.in_flight == 0 && !v.notices.is_empty())
            .await
            .unwrap()
            .clone();
        assert_eq!(view.total, 1);
        assert_eq!(view.find(a.id), Some(&a));
    }

    #[tokio::test]
    async fn test_delete_after_confirmation() {
        let api = Arc::new(MockTaskApi::default());
        let mut handle = start(api.clone());
        let a = create(&mut handle, "gone soon").await;

        handle.send(Command::RequestDelete(a.id)).unwrap();
        let view = handle.settled().await.unwrap();
        assert_eq!(view.pending_delete, Some(a.id));
        assert_eq!(view.total, 1);

        handle.send(Command::ConfirmDelete).unwrap();
        let view = handle.settled().await.unwrap();
        assert_eq!(view.total, 0);
        assert!(api.tasks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_edit_save_applies_on_confirmation() {
        let api = Arc::new(MockTaskApi::default());
        let mut handle = start(api);
        let a = create(&mut handle, "draft").await;

        handle.send(Command::BeginEdit(a.id)).unwrap();
        handle.send(Command::EditTitle("final".into())).unwrap();
        handle.send(Command::EditStatus(TaskStatus::Done)).unwrap();
        let view = handle.handled().await.unwrap();
        assert_eq!(view.editing.as_ref().unwrap().title, "final");
        assert_eq!(view.find(a.id).unwrap().title, "draft");

        handle.send(Command::SaveEdit).unwrap();
        let view = handle.settled().await.unwrap();
        assert!(view.editing.is_none());
        let saved = view.find(a.id).unwrap();
        assert_eq!(saved.title, "final");
        assert_eq!(saved.status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn test_edit_can_clear_description() {
        let api = Arc::new(MockTaskApi::default());
        let mut handle = start(api.clone());
        handle
            .send(Command::Create(NewTask {
                title: "groceries".into(),
                description: Some("oat milk".into()),
                status: None,
            }))
            .unwrap();
        let view = handle.settled().await.unwrap();
        let a = view.column(TaskStatus::ToDo).unwrap().tasks[0].clone();
        assert_eq!(a.description.as_deref(), Some("oat milk"));

        handle.send(Command::BeginEdit(a.id)).unwrap();
        handle.send(Command::EditDescription(None)).unwrap();
        handle.send(Command::SaveEdit).unwrap();
        let view = handle.settled().await.unwrap();
        assert!(view.editing.is_none());
        assert_eq!(view.find(a.id).unwrap().description, None);
        assert_eq!(api.tasks.lock().unwrap()[&a.id].description, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_is_debounced() {
        let api = Arc::new(MockTaskApi::default());
        let mut handle = start(api);
        create(&mut handle, "Buy milk").await;
        create(&mut handle, "Ship report").await;

        handle.send(Command::SearchInput("m".into())).unwrap();
        handle.handled().await.unwrap();
        tokio::time::advance(Duration::from_millis(200)).await;

        handle.send(Command::SearchInput("MILK".into())).unwrap();
        let view = handle.handled().await.unwrap();
        let typed_at = Instant::now();
        assert_eq!(view.query, "");
        assert!(view.pending_search);
        assert_eq!(view.total, 2);

        let view = handle.settled().await.unwrap();
        assert!(typed_at.elapsed() >= Duration::from_millis(300));
        assert_eq!(view.query, "MILK");
        let visible: Vec<&str> = view
            .columns
            .iter()
            .flat_map(|c| c.tasks.iter().map(|t| t.title.as_str()))
            .collect();
        assert_eq!(visible, vec!["Buy milk"]);
    }

    #[tokio::test]
    async fn test_filter_limits_columns() {
        let api = Arc::new(MockTaskApi::default());
        let mut handle = start(api);
        create(&mut handle, "A").await;

        handle
            .send(Command::SetFilter(StatusFilter::Only(TaskStatus::Done)))
            .unwrap();
        let view = handle.settled().await.unwrap();
        assert_eq!(view.columns.len(), 1);
        assert!(view.column(TaskStatus::Done).unwrap().tasks.is_empty());
        assert_eq!(view.total, 1);
    }

    #[tokio::test]
    async fn test_channel_lost_and_resync_on_reconnect() {
        let api = Arc::new(MockTaskApi::default());
        let (events_tx, events_rx) = mpsc::channel(8);
        let mut handle = BoardRuntime::new(api.clone(), Duration::from_millis(300)).spawn(Some(events_rx));
        handle.settled().await.unwrap();

        events_tx.send(RealtimeEvent::Connected).await.unwrap();
        let view = handle.changed().await.unwrap();
        assert!(view.live);

        // A task created while disconnected is picked up by the resync.
        events_tx
            .send(RealtimeEvent::Disconnected("reset".into()))
            .await
            .unwrap();
        api.create(NewTask {
            title: "missed".into(),
            ..NewTask::default()
        })
        .await
        .unwrap();
        events_tx.send(RealtimeEvent::Connected).await.unwrap();
        let view = handle
            .view
            .wait_for(|v| v.total == 1 && v.in_flight == 0)
            .await
            .unwrap()
            .clone();
        assert!(view.live);

        events_tx
            .send(RealtimeEvent::Lost("gave up".into()))
            .await
            .unwrap();
        let view = handle.view.wait_for(|v| !v.notices.is_empty()).await.unwrap().clone();
        assert!(!view.live);
        assert_eq!(view.notices[0].kind, NoticeKind::ChannelLost);
    }
}
