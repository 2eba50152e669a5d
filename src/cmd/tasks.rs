//! Board commands: `taskboard board|show|add|edit|move|delete`.
//!
//! Every mutation goes through the board runtime, so the CLI follows the
//! same optimistic and confirm-first rules as any other front end.

use anyhow::{Context, Result};
use dialoguer::Confirm;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

use taskboard::board::render::{match_id_prefix, render_board, render_task, short_id};
use taskboard::board::{
    BoardHandle, BoardRuntime, BoardView, Command, HttpTaskApi, NoticeKind, RealtimeSubscriber, Session,
    SessionStore, StatusFilter, TaskApi,
};
use taskboard::config::TaskboardConfig;
use taskboard::models::{NewTask, Task, TaskId, TaskStatus};

struct OpenBoard {
    session: Session,
    handle: BoardHandle,
}

/// Start a runtime for the stored session and wait for the initial load.
/// With `live`, a realtime subscriber feeds it as well.
async fn open_board(config: &TaskboardConfig, session_file: Option<&Path>, live: bool) -> Result<OpenBoard> {
    config.ensure_valid()?;
    let session = SessionStore::open(session_file)?.require()?;
    let api = Arc::new(HttpTaskApi::new(&session.server_url, session.token.clone()));
    let runtime = BoardRuntime::new(api, config.client.search_debounce());

    let mut handle = if live {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (outbound_tx, outbound_rx) = mpsc::channel(16);
        RealtimeSubscriber::new(
            &session.server_url,
            session.token.clone(),
            config.client.reconnect.clone(),
        )
        .spawn(events_tx, outbound_rx);
        runtime.with_outbound(outbound_tx).spawn(Some(events_rx))
    } else {
        runtime.spawn(None)
    };

    settle(&mut handle, 0).await?;
    Ok(OpenBoard { session, handle })
}

/// Wait for the runtime to go quiet and turn any notice raised after
/// `seen` into an error.
async fn settle(handle: &mut BoardHandle, seen: usize) -> Result<BoardView> {
    let view = handle.settled().await?;
    let fresh = view.notices.get(seen..).unwrap_or_default();
    if fresh.iter().any(|n| n.kind == NoticeKind::AuthRequired) {
        anyhow::bail!("Session expired or revoked. Run `taskboard login` again.");
    }
    if let Some(notice) = fresh.iter().find(|n| n.kind == NoticeKind::Failure) {
        anyhow::bail!("{}", notice.message);
    }
    Ok(view)
}

fn all_tasks(view: &BoardView) -> impl Iterator<Item = &Task> {
    view.columns.iter().flat_map(|c| c.tasks.iter())
}

fn resolve(view: &BoardView, key: &str) -> Result<Task> {
    let matches = match_id_prefix(all_tasks(view), key);
    match matches.as_slice() {
        [task] => Ok((*task).clone()),
        [] => anyhow::bail!("No task matches '{}'", key),
        many => anyhow::bail!("'{}' is ambiguous: matches {} tasks", key, many.len()),
    }
}

pub async fn cmd_board(
    config: &TaskboardConfig,
    session_file: Option<&Path>,
    watch: bool,
    status: StatusFilter,
    query: Option<String>,
) -> Result<()> {
    let OpenBoard { mut handle, .. } = open_board(config, session_file, watch).await?;

    handle.send(Command::SetFilter(status))?;
    if let Some(query) = query {
        handle.send(Command::SetQuery(query))?;
    }
    let view = handle.settled().await?;
    print!("{}", render_board(&view));

    if watch {
        let term = console::Term::stdout();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                view = handle.changed() => {
                    let view = view?;
                    term.clear_screen().context("Failed to clear terminal")?;
                    print!("{}", render_board(&view));
                }
            }
        }
    }

    handle.shutdown().await?;
    Ok(())
}

pub async fn cmd_show(config: &TaskboardConfig, session_file: Option<&Path>, id: &str) -> Result<()> {
    let OpenBoard { session, handle } = open_board(config, session_file, false).await?;
    let task = resolve(&handle.view(), id)?;
    handle.shutdown().await?;

    let api = HttpTaskApi::new(&session.server_url, session.token);
    let task = api.get(task.id).await.context("Failed to fetch task")?;
    print!("{}", render_task(&task));
    Ok(())
}

pub async fn cmd_add(
    config: &TaskboardConfig,
    session_file: Option<&Path>,
    title: String,
    description: Option<String>,
    status: Option<TaskStatus>,
) -> Result<()> {
    let OpenBoard { mut handle, .. } = open_board(config, session_file, false).await?;
    let before = handle.view();
    let known: HashSet<TaskId> = all_tasks(&before).map(|t| t.id).collect();

    handle.send(Command::Create(NewTask {
        title,
        description,
        status,
    }))?;
    let view = settle(&mut handle, before.notices.len()).await?;
    let created = all_tasks(&view)
        .find(|t| !known.contains(&t.id))
        .cloned()
        .context("Created task did not appear on the board")?;
    handle.shutdown().await?;

    println!("Created {} {} [{}]", short_id(created.id), created.title, created.status);
    Ok(())
}

pub async fn cmd_edit(
    config: &TaskboardConfig,
    session_file: Option<&Path>,
    id: &str,
    title: Option<String>,
    description: Option<String>,
    status: Option<TaskStatus>,
) -> Result<()> {
    if title.is_none() && description.is_none() && status.is_none() {
        anyhow::bail!("Nothing to change: pass --title, --description or --status");
    }

    let OpenBoard { mut handle, .. } = open_board(config, session_file, false).await?;
    let before = handle.view();
    let task = resolve(&before, id)?;

    handle.send(Command::BeginEdit(task.id))?;
    if let Some(title) = title {
        handle.send(Command::EditTitle(title))?;
    }
    // An empty --description clears the field.
    if let Some(description) = description {
        handle.send(Command::EditDescription(
            (!description.is_empty()).then_some(description),
        ))?;
    }
    if let Some(status) = status {
        handle.send(Command::EditStatus(status))?;
    }
    handle.send(Command::SaveEdit)?;

    let view = settle(&mut handle, before.notices.len()).await?;
    let saved = view
        .find(task.id)
        .cloned()
        .context("Task disappeared while saving")?;
    handle.shutdown().await?;

    print!("{}", render_task(&saved));
    Ok(())
}

pub async fn cmd_move(
    config: &TaskboardConfig,
    session_file: Option<&Path>,
    id: &str,
    status: TaskStatus,
) -> Result<()> {
    let OpenBoard { mut handle, .. } = open_board(config, session_file, false).await?;
    let before = handle.view();
    let task = resolve(&before, id)?;
    if task.status == status {
        println!("{} is already in {}", short_id(task.id), status);
        return handle.shutdown().await.map(|_| ());
    }

    handle.send(Command::MoveTask { id: task.id, to: status })?;
    let result = settle(&mut handle, before.notices.len()).await;
    let controller = handle.shutdown().await?;
    if let Err(e) = result {
        let restored = controller
            .state()
            .get(task.id)
            .map(|t| t.status)
            .unwrap_or(task.status);
        return Err(e.context(format!("Move rejected; task left in {}", restored)));
    }

    println!("Moved {} {} to {}", short_id(task.id), task.title, status);
    Ok(())
}

pub async fn cmd_delete(
    config: &TaskboardConfig,
    session_file: Option<&Path>,
    id: &str,
    yes: bool,
) -> Result<()> {
    let OpenBoard { mut handle, .. } = open_board(config, session_file, false).await?;
    let before = handle.view();
    let task = resolve(&before, id)?;

    handle.send(Command::RequestDelete(task.id))?;
    let confirmed = yes
        || Confirm::new()
            .with_prompt(format!("Delete '{}'?", task.title))
            .default(false)
            .interact()
            .context("Failed to read confirmation")?;
    if !confirmed {
        handle.send(Command::CancelDelete)?;
        handle.shutdown().await?;
        println!("Cancelled.");
        return Ok(());
    }

    handle.send(Command::ConfirmDelete)?;
    settle(&mut handle, before.notices.len()).await?;
    handle.shutdown().await?;

    println!("Deleted {} {}", short_id(task.id), task.title);
    Ok(())
}
