use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};

use recapdesk_lib::config;
use recapdesk_lib::extraction::{LifecycleState, RunPhase};
use recapdesk_lib::review::ReviewFilter;
use recapdesk_lib::types::{
    CreateTaskRequest, ExtractedItem, ItemPatch, Task, TaskStatus, WorkspaceMember,
};
use recapdesk_lib::{ApiError, AppState, StateError};

#[derive(Parser)]
#[command(name = "recapdesk")]
#[command(about = "Review meeting transcripts and turn action items into tasks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account and log in
    Signup {
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(long, env = "RECAPDESK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Log in to the review service
    Login {
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(long, env = "RECAPDESK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// End the session
    Logout,
    /// Show the logged-in user and active workspace
    Whoami,
    /// Workspaces and members
    Workspace {
        #[command(subcommand)]
        action: WorkspaceAction,
    },
    /// Workspace invitations
    Invite {
        #[command(subcommand)]
        action: InviteAction,
    },
    /// Meetings and transcripts
    Meeting {
        #[command(subcommand)]
        action: MeetingAction,
    },
    /// Start an extraction run for the active meeting
    Extract {
        /// Model identifier passed to the backend
        #[arg(short, long)]
        model: Option<String>,
        /// Transcript version to extract from (default: newest)
        #[arg(short, long)]
        transcript: Option<i64>,
        /// Poll until the run completes or fails
        #[arg(short, long)]
        wait: bool,
    },
    /// List extraction runs for the active meeting
    Runs {
        /// Select a run by id
        #[arg(short, long)]
        select: Option<i64>,
    },
    /// List extracted items of the selected run
    Items {
        /// pending, approved, rejected or all
        #[arg(short, long, default_value = "pending")]
        filter: ReviewFilter,
    },
    /// Approve an item (action items also become tasks)
    Approve { item_id: i64 },
    /// Reject an item
    Reject {
        item_id: i64,
        #[arg(short, long)]
        reason: Option<String>,
    },
    /// Edit an item's fields
    Edit {
        item_id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        details: Option<String>,
        #[arg(long)]
        speaker: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        /// Recorded with the edit (default: human_edit)
        #[arg(long)]
        reason: Option<String>,
    },
    /// Tasks in the active workspace
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
}

#[derive(Subcommand)]
enum WorkspaceAction {
    /// List your workspaces
    List,
    /// Create a workspace and switch to it
    Create { name: String },
    /// Switch the active workspace
    Use { workspace_id: i64 },
    /// List members of the active workspace
    Members,
    /// Set a member's display name (empty clears it)
    RenameMember { member_id: i64, display_name: String },
}

#[derive(Subcommand)]
enum InviteAction {
    /// Invites waiting for you
    List,
    /// Invite someone to the active workspace
    Send { email: String },
    /// Accept an invite
    Accept { invite_id: i64 },
    /// Decline an invite
    Decline { invite_id: i64 },
}

#[derive(Subcommand)]
enum MeetingAction {
    /// List meetings in the active workspace
    List,
    /// Create a meeting
    Create {
        title: String,
        /// YYYY-MM-DD or RFC 3339
        #[arg(long)]
        date: Option<String>,
    },
    /// Switch the active meeting
    Use { meeting_id: i64 },
    /// Upload a .txt transcript
    Upload {
        path: PathBuf,
        /// Defaults to the active meeting
        #[arg(long)]
        meeting: Option<i64>,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// List tasks
    List {
        #[arg(long)]
        assignee: Option<String>,
    },
    /// Add a task
    Add {
        title: String,
        #[arg(long)]
        details: Option<String>,
        /// YYYY-MM-DD or RFC 3339
        #[arg(long)]
        due: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
    },
    /// Change a task's status
    Status { task_id: i64, status: TaskStatus },
    /// Mark a task done (undoable)
    Done { task_id: i64 },
    /// Revert the last "done"
    Undo,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn,recapdesk_lib=info"),
    )
    .format_timestamp(None)
    .init();

    let cli = Cli::parse();
    let cfg = config::load_config()?;
    log::debug!("Using API at {}", cfg.api_base_url);

    let rt = tokio::runtime::Runtime::new()?;
    let state = AppState::open(cfg)?;
    let result = rt.block_on(run(cli.command, &state));

    if let Err(e) = state.persist() {
        log::warn!("Failed to save session: {}", e);
    }

    match result {
        Err(e) if needs_login(&e) => {
            eprintln!("Not logged in. Run 'recapdesk login --email <you@example.com>' first.");
            std::process::exit(2);
        }
        other => other,
    }
}

fn needs_login(err: &anyhow::Error) -> bool {
    if let Some(e) = err.downcast_ref::<StateError>() {
        return e.requires_login();
    }
    err.downcast_ref::<ApiError>()
        .map(ApiError::is_unauthorized)
        .unwrap_or(false)
}

async fn run(command: Commands, state: &AppState) -> Result<()> {
    match command {
        Commands::Signup { email, password } => {
            let password = read_password(password)?;
            let user = state.signup(&email, &password).await?;
            println!("Signed up as {}", user.email);
            print_active_workspace(state);
            Ok(())
        }
        Commands::Login { email, password } => {
            let password = read_password(password)?;
            let user = state.login(&email, &password).await?;
            println!("Logged in as {}", user.email);
            print_active_workspace(state);
            Ok(())
        }
        Commands::Logout => {
            state.logout().await?;
            println!("Logged out");
            Ok(())
        }
        Commands::Whoami => {
            let user = state.ensure_ready().await?;
            println!("{} (id {})", user.email, user.id);
            print_active_workspace(state);
            Ok(())
        }
        Commands::Workspace { action } => workspace(action, state).await,
        Commands::Invite { action } => invite(action, state).await,
        Commands::Meeting { action } => meeting(action, state).await,
        Commands::Extract {
            model,
            transcript,
            wait,
        } => {
            state.ensure_ready().await?;
            let meeting_id = state.store.require_meeting()?;
            let model = model.or_else(|| state.config.default_model.clone());
            let run_id = state
                .extraction
                .start_extraction(meeting_id, model, transcript)
                .await?;
            println!("Started extraction {}", run_id);
            if wait {
                let settled = wait_with_progress(state).await;
                print_run_outcome(&settled);
            } else {
                println!("Run 'recapdesk items' to check progress.");
            }
            Ok(())
        }
        Commands::Runs { select } => {
            state.ensure_ready().await?;
            state.open_active_meeting().await?;
            if let Some(run_id) = select {
                state.extraction.select_run(run_id).await?;
            }
            let lifecycle = state.extraction.snapshot();
            if lifecycle.runs.is_empty() {
                println!("No extraction runs yet. Upload a transcript and run 'recapdesk extract'.");
            }
            for run in &lifecycle.runs {
                let marker = if lifecycle.selected == Some(run.id) { "*" } else { " " };
                println!(
                    "{} {:>5}  {:<10}  {}  {}{}",
                    marker,
                    run.id,
                    run.status,
                    run.created_at.format("%Y-%m-%d %H:%M"),
                    run.model.as_deref().unwrap_or("-"),
                    run.error
                        .as_deref()
                        .map(|e| format!("  ({})", e))
                        .unwrap_or_default()
                );
            }
            Ok(())
        }
        Commands::Items { filter } => {
            state.ensure_ready().await?;
            state.open_active_meeting().await?;
            let lifecycle = state.extraction.snapshot();
            match lifecycle.phase() {
                RunPhase::NoRun => {
                    println!("No extraction run for this meeting.");
                    return Ok(());
                }
                RunPhase::Processing => println!("Extraction is still processing."),
                RunPhase::Failed => print_run_outcome(&lifecycle),
                RunPhase::Complete => {}
            }
            let counts: Vec<String> = ReviewFilter::VIEWS
                .iter()
                .map(|f| format!("{} {}", f, f.count(&lifecycle.items)))
                .collect();
            println!("{}", counts.join(" | "));
            let shown = filter.apply(&lifecycle.items);
            if shown.is_empty() {
                println!("No {} items.", filter);
            }
            for item in shown {
                print_item(item);
            }
            Ok(())
        }
        Commands::Approve { item_id } => {
            load_review(state).await?;
            let outcome = state.approve(item_id).await?;
            println!("Approved item {}", outcome.item.id);
            if let Some(task) = outcome.task {
                println!("Created task {}: {}", task.id, task.title);
            }
            if let Some(err) = outcome.task_error {
                eprintln!("Task was not created: {}", err);
            }
            Ok(())
        }
        Commands::Reject { item_id, reason } => {
            load_review(state).await?;
            let item = state.reject(item_id, reason.as_deref()).await?;
            println!("Rejected item {} ({})", item.id, item.review_reasons.join(", "));
            Ok(())
        }
        Commands::Edit {
            item_id,
            title,
            details,
            speaker,
            start,
            end,
            reason,
        } => {
            let patch = ItemPatch {
                title,
                details,
                speaker,
                timestamp_start: start,
                timestamp_end: end,
                ..Default::default()
            };
            if patch.is_empty() {
                bail!("Nothing to edit: pass at least one of --title, --details, --speaker, --start, --end");
            }
            load_review(state).await?;
            let item = state.edit(item_id, patch, reason.as_deref()).await?;
            print_item(&item);
            Ok(())
        }
        Commands::Task { action } => task(action, state).await,
    }
}

async fn workspace(action: WorkspaceAction, state: &AppState) -> Result<()> {
    state.ensure_ready().await?;
    match action {
        WorkspaceAction::List => {
            let snap = state.store.snapshot();
            if snap.workspaces.is_empty() {
                println!("No workspaces. Create one with 'recapdesk workspace create <name>'.");
            }
            for ws in &snap.workspaces {
                let marker = if snap.active_workspace == Some(ws.id) { "*" } else { " " };
                println!("{} {:>5}  {}", marker, ws.id, ws.name);
            }
        }
        WorkspaceAction::Create { name } => {
            let ws = state.store.create_workspace(&name).await?;
            state.extraction.clear();
            println!("Created workspace {} ({})", ws.name, ws.id);
        }
        WorkspaceAction::Use { workspace_id } => {
            let ws = state.select_workspace(workspace_id).await?;
            println!("Switched to {}", ws.name);
        }
        WorkspaceAction::Members => {
            for member in &state.store.snapshot().members {
                print_member(member);
            }
        }
        WorkspaceAction::RenameMember {
            member_id,
            display_name,
        } => {
            let member = state.store.rename_member(member_id, &display_name).await?;
            print_member(&member);
        }
    }
    Ok(())
}

async fn invite(action: InviteAction, state: &AppState) -> Result<()> {
    state.ensure_ready().await?;
    match action {
        InviteAction::List => {
            let pending = state.invites.pending().await?;
            if pending.is_empty() {
                println!("No pending invites.");
            }
            for inv in pending {
                println!(
                    "{:>5}  {}  from {}",
                    inv.id,
                    inv.workspace_name,
                    inv.invited_by_email.as_deref().unwrap_or("unknown")
                );
            }
        }
        InviteAction::Send { email } => {
            let ws = state.store.require_workspace()?;
            let inv = state.invites.send(ws, &email).await?;
            println!("Invited {} to {}", inv.email, inv.workspace_name);
        }
        InviteAction::Accept { invite_id } => {
            let inv = state.invites.accept(invite_id).await?;
            state.store.load_workspaces().await?;
            println!("Joined {}", inv.workspace_name);
        }
        InviteAction::Decline { invite_id } => {
            let inv = state.invites.decline(invite_id).await?;
            println!("Declined invite to {}", inv.workspace_name);
        }
    }
    Ok(())
}

async fn meeting(action: MeetingAction, state: &AppState) -> Result<()> {
    state.ensure_ready().await?;
    match action {
        MeetingAction::List => {
            let snap = state.store.snapshot();
            if snap.meetings.is_empty() {
                println!("No meetings in this workspace.");
            }
            for m in &snap.meetings {
                let marker = if snap.active_meeting == Some(m.id) { "*" } else { " " };
                let date = m
                    .meeting_date
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{} {:>5}  {:<10}  {}", marker, m.id, date, m.title);
            }
        }
        MeetingAction::Create { title, date } => {
            let date = date.as_deref().map(parse_date).transpose()?;
            let m = state.store.create_meeting(&title, date).await?;
            state.select_meeting(m.id).await?;
            println!("Created meeting {} ({}) and made it active", m.title, m.id);
        }
        MeetingAction::Use { meeting_id } => {
            let m = state.select_meeting(meeting_id).await?;
            println!("Switched to {}", m.title);
            print_run_outcome(&state.extraction.snapshot());
        }
        MeetingAction::Upload { path, meeting } => {
            let meeting_id = match meeting {
                Some(id) => id,
                None => state.store.require_meeting()?,
            };
            let version = state.store.upload_transcript(meeting_id, &path).await?;
            println!(
                "Uploaded transcript version {} (checksum {})",
                version.id, version.checksum
            );
        }
    }
    Ok(())
}

async fn task(action: TaskAction, state: &AppState) -> Result<()> {
    state.ensure_ready().await?;
    match action {
        TaskAction::List { assignee } => {
            let tasks = state.store.refresh_tasks(assignee.as_deref()).await?;
            if tasks.is_empty() {
                println!("No tasks.");
            }
            for t in &tasks {
                print_task(t);
            }
            if state.undo.can_undo() {
                println!("(undo available: 'recapdesk task undo')");
            }
        }
        TaskAction::Add {
            title,
            details,
            due,
            assignee,
        } => {
            let ws = state.store.require_workspace()?;
            let req = CreateTaskRequest {
                details,
                due_at: due.as_deref().map(parse_date).transpose()?,
                assignee_display_name: assignee,
                ..CreateTaskRequest::new(ws, title)
            };
            let t = state.store.create_task(&req).await?;
            print_task(&t);
        }
        TaskAction::Status { task_id, status } => {
            let t = if status == TaskStatus::Done {
                state.mark_task_done(task_id).await?
            } else {
                state.store.set_task_status(task_id, status).await?
            };
            print_task(&t);
        }
        TaskAction::Done { task_id } => {
            let t = state.mark_task_done(task_id).await?;
            print_task(&t);
            println!("Run 'recapdesk task undo' to revert.");
        }
        TaskAction::Undo => {
            let t = state.undo_task().await?;
            print_task(&t);
        }
    }
    Ok(())
}

/// Session, workspace and the active meeting's selected run, with items.
async fn load_review(state: &AppState) -> Result<()> {
    state.ensure_ready().await?;
    state.open_active_meeting().await?;
    Ok(())
}

async fn wait_with_progress(state: &AppState) -> LifecycleState {
    let mut rx = state.extraction.subscribe();
    let waiter = state.extraction.wait_until_settled();
    tokio::pin!(waiter);
    loop {
        tokio::select! {
            settled = &mut waiter => return settled,
            changed = rx.changed() => {
                if changed.is_err() {
                    return state.extraction.snapshot();
                }
                if let Some(err) = rx.borrow_and_update().last_error.clone() {
                    eprintln!("Poll failed, retrying: {}", err);
                }
            }
        }
    }
}

fn read_password(arg: Option<String>) -> Result<String> {
    if let Some(p) = arg {
        return Ok(p);
    }
    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .ok_or_else(|| anyhow!("Invalid date '{}': use YYYY-MM-DD", raw))
}

fn print_active_workspace(state: &AppState) {
    match state.store.snapshot().workspace() {
        Some(ws) => println!("Active workspace: {} ({})", ws.name, ws.id),
        None => println!("No workspace yet. Create one with 'recapdesk workspace create <name>'."),
    }
}

fn print_run_outcome(lifecycle: &LifecycleState) {
    match lifecycle.selected_run() {
        None => println!("No extraction run."),
        Some(run) => match lifecycle.phase() {
            RunPhase::Failed => println!(
                "Extraction {} failed: {}",
                run.id,
                run.error.as_deref().unwrap_or("no reason given")
            ),
            _ => println!(
                "Extraction {} is {} ({} items)",
                run.id,
                run.status,
                lifecycle.items.len()
            ),
        },
    }
}

fn print_member(member: &WorkspaceMember) {
    println!(
        "{:>5}  {:<24}  {:<6}  {}",
        member.id,
        member.label(),
        member.role,
        member.email
    );
}

fn print_item(item: &ExtractedItem) {
    let confidence = item
        .confidence
        .map(|c| format!("{:>3.0}%", c * 100.0))
        .unwrap_or_else(|| "   -".to_string());
    let flag = if item.needs_review { "!" } else { " " };
    println!(
        "{}{:>5}  {:<13}  {:<8}  {}  {}",
        flag, item.id, item.kind, item.status, confidence, item.title
    );
    if let Some(details) = item.details.as_deref().filter(|d| !d.is_empty()) {
        println!("         {}", details);
    }
    let mut meta = Vec::new();
    if let Some(speaker) = &item.speaker {
        meta.push(speaker.clone());
    }
    if let Some(span) = item.time_span() {
        meta.push(span);
    }
    if item.needs_review && !item.review_reasons.is_empty() {
        meta.push(format!("review: {}", item.review_reasons.join(", ")));
    }
    if !meta.is_empty() {
        println!("         [{}]", meta.join(" · "));
    }
    for snippet in item.evidence.iter().take(2) {
        println!("         > {}", snippet);
    }
}

fn print_task(task: &Task) {
    let due = task
        .due_at
        .map(|d| format!("  due {}", d.format("%Y-%m-%d")))
        .unwrap_or_default();
    println!("{:>5}  {:<11}  {}{}", task.id, task.status, task.title, due);
}
