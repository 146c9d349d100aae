use anyhow::{Context, Result};
use clap::Parser;
use client_core::{BoardClient, BoardState, ClientEvent, Settlement};
use shared::{
    domain::{BoardId, ListId, PresenceUser, TaskId},
    ordering::Placement,
    protocol::{MutationRequest, ServerEvent},
};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    server_url: String,
    #[arg(long)]
    username: String,
    #[arg(long)]
    board_id: i64,
    /// Task to move optimistically right after joining.
    #[arg(long, requires = "to_list")]
    move_task: Option<i64>,
    #[arg(long)]
    to_list: Option<i64>,
    /// Index in the destination list; the end when omitted.
    #[arg(long)]
    index: Option<usize>,
}

fn print_board(state: &BoardState) {
    println!("== {} ==", state.board().name);
    for list in state.lists() {
        println!("[{}] {}", list.id, list.title);
        for task in state.tasks_in(list.id) {
            println!("    ({}) {} [{}]", task.id, task.title, task.priority.as_str());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();
    let board_id = BoardId(args.board_id);

    let client = BoardClient::new(args.server_url);
    let user_id = client.login(&args.username).await?;
    println!("Logged in as user_id={user_id}");

    let mut state = BoardState::from_snapshot(
        client
            .fetch_board(board_id)
            .await
            .with_context(|| format!("failed to load board {board_id}"))?,
    );
    print_board(&state);

    let mut events = client.subscribe_events();
    client.connect().await?;
    client
        .join_board(
            board_id,
            Some(PresenceUser {
                user_id: Some(user_id),
                name: args.username.clone(),
                avatar: None,
            }),
        )
        .await?;

    if let (Some(task_id), Some(to_list)) = (args.move_task, args.to_list) {
        let settlement = client
            .mutate_optimistic(
                &mut state,
                MutationRequest::MoveTask {
                    task_id: TaskId(task_id),
                    to_list_id: Some(ListId(to_list)),
                    placement: Some(args.index.map_or(Placement::End, Placement::Index)),
                    from_list_id: None,
                },
            )
            .await?;
        match settlement {
            Settlement::Committed(_) => println!("move committed"),
            Settlement::Reverted { error } => println!("move reverted: {error}"),
        }
        print_board(&state);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let _ = client.leave_board(board_id).await;
                client.disconnect().await;
                break;
            }
            event = events.recv() => match event {
                Ok(ClientEvent::Server(event)) => {
                    match &event {
                        ServerEvent::UserJoined { user, .. } => println!("+ {}", user.name),
                        ServerEvent::UserLeft { user, .. } => println!("- {}", user.name),
                        ServerEvent::Error(err) => println!("server error: {err}"),
                        other if other.mutation_kind().is_some() => {
                            if state.apply_event(other) {
                                println!("{}", other.name());
                                print_board(&state);
                            }
                            if state.is_deleted() {
                                println!("board was deleted");
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                Ok(ClientEvent::Error(err)) => warn!(%err, "client error"),
                Ok(ClientEvent::Disconnected) => {
                    println!("disconnected");
                    break;
                }
                Err(RecvError::Lagged(skipped)) => {
                    // missed events cannot be replayed, re-fetch instead
                    warn!(skipped, "event stream lagged, reloading board");
                    state.reset(client.fetch_board(board_id).await?);
                    print_board(&state);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    Ok(())
}
