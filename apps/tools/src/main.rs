use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use shared::{
    domain::{BoardId, ListId, Priority, Role, UserId, DEFAULT_BOARD_COLOR},
    ordering,
};
use storage::{BoardRepository, NewBoard, NewList, NewTask, Storage};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/boards.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateUser {
        username: String,
    },
    CreateBoard {
        owner_user_id: i64,
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value = DEFAULT_BOARD_COLOR)]
        color: String,
    },
    AddMember {
        board_id: i64,
        user_id: i64,
        #[arg(long, default_value = "member")]
        role: String,
    },
    CreateList {
        board_id: i64,
        title: String,
    },
    CreateTask {
        list_id: i64,
        title: String,
        #[arg(long, default_value = "medium")]
        priority: String,
    },
    ShowBoard {
        board_id: i64,
    },
    /// Rewrites list and task positions of a board to evenly spaced values.
    Compact {
        board_id: i64,
        /// Compact even when no container needs it.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateUser { username } => {
            let user = storage.create_user(username.trim()).await?;
            println!("created user_id={} username={}", user.id, user.username);
        }
        Command::CreateBoard {
            owner_user_id,
            name,
            description,
            color,
        } => {
            let board = storage
                .create_board(
                    UserId(owner_user_id),
                    NewBoard {
                        name,
                        description,
                        color,
                    },
                )
                .await?;
            println!("created board_id={}", board.id);
        }
        Command::AddMember {
            board_id,
            user_id,
            role,
        } => {
            let role: Role = role.parse().map_err(|e: String| anyhow!(e))?;
            let member = storage
                .add_member(BoardId(board_id), UserId(user_id), role)
                .await?;
            println!(
                "added user_id={} to board_id={} as {}",
                member.user.id,
                member.board_id,
                member.role.as_str()
            );
        }
        Command::CreateList { board_id, title } => {
            let siblings = storage.list_lists(BoardId(board_id)).await?;
            let list = storage
                .create_list(NewList {
                    board_id: BoardId(board_id),
                    title,
                    position: ordering::end_position(&siblings),
                })
                .await?;
            println!("created list_id={} position={}", list.id, list.position);
        }
        Command::CreateTask {
            list_id,
            title,
            priority,
        } => {
            let priority: Priority = priority.parse().map_err(|e: String| anyhow!(e))?;
            let siblings = storage.list_tasks(ListId(list_id)).await?;
            let task = storage
                .create_task(NewTask {
                    list_id: ListId(list_id),
                    title,
                    description: None,
                    position: ordering::end_position(&siblings),
                    priority,
                    assignee_id: None,
                    due_date: None,
                })
                .await?;
            println!("created task_id={} position={}", task.id, task.position);
        }
        Command::ShowBoard { board_id } => {
            let snapshot = storage.get_board(BoardId(board_id)).await?;
            println!("{} (board_id={})", snapshot.board.name, snapshot.board.id);
            for member in &snapshot.members {
                println!("  member {} [{}]", member.user.username, member.role.as_str());
            }
            for entry in &snapshot.lists {
                println!(
                    "  [{}] {} @{}",
                    entry.list.id, entry.list.title, entry.list.position
                );
                for task in &entry.tasks {
                    let assignee = task
                        .assignee
                        .as_ref()
                        .map(|user| user.username.as_str())
                        .unwrap_or("-");
                    println!(
                        "    ({}) {} @{} {} {}",
                        task.id,
                        task.title,
                        task.position,
                        task.priority.as_str(),
                        assignee
                    );
                }
            }
        }
        Command::Compact { board_id, force } => {
            let board_id = BoardId(board_id);
            let lists = storage.list_lists(board_id).await?;
            if force || ordering::needs_renumber(&lists) {
                storage
                    .renumber_lists(board_id, &ordering::renumber(&lists))
                    .await?;
                info!(board_id = %board_id, lists = lists.len(), "compacted list positions");
            }
            let mut compacted = 0;
            for list in &lists {
                let tasks = storage.list_tasks(list.id).await?;
                if force || ordering::needs_renumber(&tasks) {
                    storage
                        .renumber_tasks(list.id, &ordering::renumber(&tasks))
                        .await?;
                    info!(list_id = %list.id, tasks = tasks.len(), "compacted task positions");
                    compacted += 1;
                }
            }
            println!("compacted {compacted} of {} lists on board_id={board_id}", lists.len());
        }
    }

    Ok(())
}
