use super::*;
use crate::registry::RoomRegistry;
use async_trait::async_trait;
use shared::{
    domain::{List, ListId, PresenceUser, Task, TaskId},
    protocol::MutationReply,
};
use storage::Storage;
use tokio::sync::mpsc;

type Inbox = mpsc::Receiver<Arc<ServerEvent>>;

struct Harness {
    coordinator: Coordinator,
    registry: Arc<RoomRegistry>,
    storage: Storage,
    owner: UserSummary,
    board_id: BoardId,
}

impl Harness {
    async fn new() -> Self {
        Self::with_config(CoordinatorConfig::default()).await
    }

    async fn with_config(config: CoordinatorConfig) -> Self {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let owner = storage.create_user("owner").await.expect("user");
        let board = storage
            .create_board(
                owner.id,
                NewBoard {
                    name: "Team".into(),
                    description: None,
                    color: DEFAULT_BOARD_COLOR.into(),
                },
            )
            .await
            .expect("board");
        let registry = Arc::new(RoomRegistry::new());
        let broadcaster = Arc::new(Broadcaster::new(registry.clone()));
        let coordinator = Coordinator::new(Arc::new(storage.clone()), broadcaster, config);
        Self {
            coordinator,
            registry,
            storage,
            owner,
            board_id: board.id,
        }
    }

    fn watcher(&self, board_id: BoardId) -> (ConnectionId, Inbox) {
        let (tx, rx) = mpsc::channel(32);
        let connection_id = self.registry.connect(tx);
        self.registry
            .join(connection_id, board_id, PresenceUser::anonymous());
        (connection_id, rx)
    }

    fn origin(&self) -> Origin {
        Origin::user(self.owner.id)
    }

    async fn list(&self, title: &str) -> List {
        let committed = self
            .coordinator
            .apply(
                self.origin(),
                MutationRequest::CreateList {
                    board_id: Some(self.board_id),
                    title: Some(title.into()),
                    placement: None,
                },
            )
            .await
            .expect("list");
        let Committed::List(list) = committed else {
            panic!("expected list, got {committed:?}");
        };
        list
    }

    async fn task(&self, list_id: ListId, title: &str) -> Task {
        let committed = self
            .coordinator
            .apply(self.origin(), create_task(list_id, title))
            .await
            .expect("task");
        let Committed::Task(task) = committed else {
            panic!("expected task, got {committed:?}");
        };
        task
    }
}

fn create_task(list_id: ListId, title: &str) -> MutationRequest {
    MutationRequest::CreateTask {
        list_id: Some(list_id),
        title: Some(title.into()),
        description: None,
        placement: None,
        priority: None,
        assignee_id: None,
        due_date: None,
    }
}

fn move_task(task_id: TaskId, to_list_id: ListId, placement: Placement<TaskId>) -> MutationRequest {
    MutationRequest::MoveTask {
        task_id,
        to_list_id: Some(to_list_id),
        placement: Some(placement),
        from_list_id: None,
    }
}

fn drain(inbox: &mut Inbox) -> Vec<Arc<ServerEvent>> {
    let mut events = Vec::new();
    while let Ok(event) = inbox.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn committed_mutation_publishes_exactly_one_event_to_the_room() {
    let harness = Harness::new().await;
    let todo = harness.list("Todo").await;
    let (_a, mut a_inbox) = harness.watcher(harness.board_id);
    let (_b, mut b_inbox) = harness.watcher(harness.board_id);
    let (_other, mut other_inbox) = harness.watcher(BoardId(harness.board_id.0 + 100));

    let task = harness.task(todo.id, "write tests").await;
    assert_eq!(task.priority, shared::domain::Priority::Medium);
    assert_eq!(task.position, 0.0);

    for inbox in [&mut a_inbox, &mut b_inbox] {
        let events = drain(inbox);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &*events[0],
            ServerEvent::TaskCreated { list_id, task: created } if *list_id == todo.id && created.id == task.id
        ));
    }
    assert!(drain(&mut other_inbox).is_empty());
}

#[tokio::test]
async fn deleting_non_empty_list_conflicts_and_publishes_nothing() {
    let harness = Harness::new().await;
    let todo = harness.list("Todo").await;
    harness.task(todo.id, "pending").await;
    let (_watcher, mut inbox) = harness.watcher(harness.board_id);

    let err = harness
        .coordinator
        .apply(harness.origin(), MutationRequest::DeleteList { list_id: todo.id })
        .await
        .expect_err("conflict");
    assert_eq!(err.code, ErrorCode::Conflict);
    assert!(drain(&mut inbox).is_empty());
    assert_eq!(
        harness.storage.list_tasks(todo.id).await.expect("tasks").len(),
        1
    );
    assert_eq!(
        harness.storage.list_lists(harness.board_id).await.expect("lists").len(),
        1
    );
}

#[tokio::test]
async fn empty_list_delete_is_announced_with_ids() {
    let harness = Harness::new().await;
    let todo = harness.list("Todo").await;
    let (_watcher, mut inbox) = harness.watcher(harness.board_id);

    let committed = harness
        .coordinator
        .apply(harness.origin(), MutationRequest::DeleteList { list_id: todo.id })
        .await
        .expect("delete");
    assert_eq!(committed, Committed::ListDeleted(todo.id));
    let events = drain(&mut inbox);
    assert_eq!(
        events.iter().map(|e| (**e).clone()).collect::<Vec<_>>(),
        vec![ServerEvent::ListDeleted {
            board_id: harness.board_id,
            list_id: todo.id,
        }]
    );
}

#[tokio::test]
async fn missing_title_is_rejected_before_touching_the_store() {
    let harness = Harness::new().await;
    let todo = harness.list("Todo").await;
    let (_watcher, mut inbox) = harness.watcher(harness.board_id);

    for title in [None, Some("   ".to_string())] {
        let err = harness
            .coordinator
            .apply(
                harness.origin(),
                MutationRequest::CreateTask {
                    list_id: Some(todo.id),
                    title,
                    description: None,
                    placement: None,
                    priority: None,
                    assignee_id: None,
                    due_date: None,
                },
            )
            .await
            .expect_err("validation");
        assert_eq!(err.code, ErrorCode::Validation);
    }
    assert!(drain(&mut inbox).is_empty());
    assert!(harness.storage.list_tasks(todo.id).await.expect("tasks").is_empty());
}

#[tokio::test]
async fn empty_patch_is_a_validation_error() {
    let harness = Harness::new().await;
    let todo = harness.list("Todo").await;
    let task = harness.task(todo.id, "t").await;
    let err = harness
        .coordinator
        .apply(
            harness.origin(),
            MutationRequest::UpdateTask {
                task_id: task.id,
                title: None,
                description: None,
                priority: None,
                position: None,
                assignee_id: None,
                due_date: None,
            },
        )
        .await
        .expect_err("empty");
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn non_members_are_forbidden() {
    let harness = Harness::new().await;
    let todo = harness.list("Todo").await;
    let stranger = harness.storage.create_user("stranger").await.expect("user");

    let err = harness
        .coordinator
        .apply(Origin::user(stranger.id), create_task(todo.id, "sneaky"))
        .await
        .expect_err("forbidden");
    assert_eq!(err.code, ErrorCode::Forbidden);

    let err = harness
        .coordinator
        .board_snapshot(stranger.id, BoardId(9999))
        .await
        .expect_err("missing board");
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn only_the_owner_deletes_a_board() {
    let harness = Harness::new().await;
    let member = harness.storage.create_user("member").await.expect("user");
    harness
        .coordinator
        .add_member(harness.owner.id, harness.board_id, member.id, Role::Member)
        .await
        .expect("add member");

    let err = harness
        .coordinator
        .apply(
            Origin::user(member.id),
            MutationRequest::DeleteBoard {
                board_id: harness.board_id,
            },
        )
        .await
        .expect_err("forbidden");
    assert_eq!(err.code, ErrorCode::Forbidden);

    let err = harness
        .coordinator
        .add_member(member.id, harness.board_id, member.id, Role::Admin)
        .await
        .expect_err("members cannot promote");
    assert_eq!(err.code, ErrorCode::Forbidden);

    let (_watcher, mut inbox) = harness.watcher(harness.board_id);
    harness
        .coordinator
        .apply(
            harness.origin(),
            MutationRequest::DeleteBoard {
                board_id: harness.board_id,
            },
        )
        .await
        .expect("owner deletes");
    assert_eq!(drain(&mut inbox).len(), 1);
}

#[tokio::test]
async fn move_to_end_then_to_front() {
    let harness = Harness::new().await;
    let todo = harness.list("Todo").await;
    let a = harness.task(todo.id, "A").await;
    let b = harness.task(todo.id, "B").await;
    assert_eq!((a.position, b.position), (0.0, 1.0));

    let moved = harness
        .coordinator
        .apply(harness.origin(), move_task(a.id, todo.id, Placement::End))
        .await
        .expect("to end");
    let Committed::Task(moved) = moved else {
        panic!("expected task");
    };
    assert_eq!(moved.position, 2.0);
    let order: Vec<_> = harness
        .storage
        .list_tasks(todo.id)
        .await
        .expect("tasks")
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(order, vec![b.id, a.id]);

    harness
        .coordinator
        .apply(harness.origin(), move_task(a.id, todo.id, Placement::Index(0)))
        .await
        .expect("to front");
    let tasks = harness.storage.list_tasks(todo.id).await.expect("tasks");
    assert_eq!(tasks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![a.id, b.id]);
    assert!(tasks[0].position < tasks[1].position);
}

#[tokio::test]
async fn index_move_between_tied_tasks_renumbers_the_list() {
    let harness = Harness::new().await;
    let todo = harness.list("Todo").await;
    let done = harness.list("Done").await;
    let a = harness.task(todo.id, "A").await;
    let committed = harness
        .coordinator
        .apply(
            harness.origin(),
            MutationRequest::CreateTask {
                list_id: Some(todo.id),
                title: Some("B".into()),
                description: None,
                placement: Some(Placement::Exact(a.position)),
                priority: None,
                assignee_id: None,
                due_date: None,
            },
        )
        .await
        .expect("tied task");
    let Committed::Task(b) = committed else {
        panic!("expected task");
    };
    assert_eq!(b.position, a.position);
    let c = harness.task(done.id, "C").await;
    let (_watcher, mut inbox) = harness.watcher(harness.board_id);

    harness
        .coordinator
        .apply(harness.origin(), move_task(c.id, todo.id, Placement::Index(1)))
        .await
        .expect("move");

    let tasks = harness.storage.list_tasks(todo.id).await.expect("tasks");
    assert_eq!(
        tasks.iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![a.id, c.id, b.id]
    );
    assert!(!ordering::needs_renumber(&tasks));

    // the rewritten neighbours go out before the move itself
    let events = drain(&mut inbox);
    let names: Vec<_> = events.iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["task:updated", "task:updated", "task:moved"]);
    for event in &events[..2] {
        let ServerEvent::TaskUpdated { task } = &**event else {
            panic!("expected task:updated");
        };
        let stored = tasks.iter().find(|t| t.id == task.id).expect("stored");
        assert_eq!(task.position, stored.position);
    }
}

#[tokio::test]
async fn list_placed_between_tied_lists_lands_at_index() {
    let harness = Harness::new().await;
    let first = harness.list("First").await;
    let committed = harness
        .coordinator
        .apply(
            harness.origin(),
            MutationRequest::CreateList {
                board_id: Some(harness.board_id),
                title: Some("Second".into()),
                placement: Some(Placement::Exact(first.position)),
            },
        )
        .await
        .expect("tied list");
    let Committed::List(second) = committed else {
        panic!("expected list");
    };

    let committed = harness
        .coordinator
        .apply(
            harness.origin(),
            MutationRequest::CreateList {
                board_id: Some(harness.board_id),
                title: Some("Middle".into()),
                placement: Some(Placement::After(first.id)),
            },
        )
        .await
        .expect("middle list");
    let Committed::List(middle) = committed else {
        panic!("expected list");
    };
    let order: Vec<_> = harness
        .storage
        .list_lists(harness.board_id)
        .await
        .expect("lists")
        .into_iter()
        .map(|l| l.id)
        .collect();
    assert_eq!(order, vec![first.id, middle.id, second.id]);
}

#[tokio::test]
async fn move_between_lists_reports_source_and_destination() {
    let harness = Harness::new().await;
    let todo = harness.list("Todo").await;
    let done = harness.list("Done").await;
    let task = harness.task(todo.id, "ship").await;
    let (_watcher, mut inbox) = harness.watcher(harness.board_id);

    harness
        .coordinator
        .apply(
            harness.origin(),
            MutationRequest::MoveTask {
                task_id: task.id,
                to_list_id: Some(done.id),
                placement: Some(Placement::Index(0)),
                from_list_id: Some(todo.id),
            },
        )
        .await
        .expect("move");
    let events = drain(&mut inbox);
    assert_eq!(events.len(), 1);
    let ServerEvent::TaskMoved {
        task: moved,
        from_list_id,
        to_list_id,
        animate,
    } = &*events[0]
    else {
        panic!("expected task:moved, got {:?}", events[0]);
    };
    assert_eq!(moved.list_id, done.id);
    assert_eq!(*from_list_id, Some(todo.id));
    assert_eq!(*to_list_id, done.id);
    assert!(*animate);
}

#[tokio::test]
async fn moving_onto_another_board_is_rejected() {
    let harness = Harness::new().await;
    let todo = harness.list("Todo").await;
    let task = harness.task(todo.id, "stay").await;
    let other = harness
        .coordinator
        .apply(
            harness.origin(),
            MutationRequest::CreateBoard {
                name: Some("Other".into()),
                description: None,
                color: None,
            },
        )
        .await
        .expect("board");
    let Committed::Board(other) = other else {
        panic!("expected board");
    };
    assert_eq!(other.color, DEFAULT_BOARD_COLOR);
    let foreign = harness
        .coordinator
        .apply(
            harness.origin(),
            MutationRequest::CreateList {
                board_id: Some(other.id),
                title: Some("Elsewhere".into()),
                placement: None,
            },
        )
        .await
        .expect("list");
    let Committed::List(foreign) = foreign else {
        panic!("expected list");
    };

    let err = harness
        .coordinator
        .apply(harness.origin(), move_task(task.id, foreign.id, Placement::End))
        .await
        .expect_err("cross board");
    assert_eq!(err.code, ErrorCode::Validation);
    assert_eq!(
        harness.storage.get_task(task.id).await.expect("task").list_id,
        todo.id
    );
}

#[tokio::test]
async fn originator_can_be_left_out_of_the_echo() {
    let harness = Harness::with_config(CoordinatorConfig {
        echo_to_originator: false,
        ..CoordinatorConfig::default()
    })
    .await;
    let (origin, mut origin_inbox) = harness.watcher(harness.board_id);
    let (_peer, mut peer_inbox) = harness.watcher(harness.board_id);

    harness
        .coordinator
        .apply(
            Origin::connection(harness.owner.id, origin),
            MutationRequest::CreateList {
                board_id: Some(harness.board_id),
                title: Some("Todo".into()),
                placement: None,
            },
        )
        .await
        .expect("list");
    assert!(drain(&mut origin_inbox).is_empty());
    assert_eq!(drain(&mut peer_inbox).len(), 1);
}

#[tokio::test]
async fn submit_finishes_the_write_after_the_caller_goes_away() {
    let harness = Harness::new().await;
    let todo = harness.list("Todo").await;
    let (_peer, mut inbox) = harness.watcher(harness.board_id);

    let abandoned = harness
        .coordinator
        .submit(harness.origin(), create_task(todo.id, "orphaned caller"));
    // poll once, then drop the caller's future
    let _ = tokio::time::timeout(Duration::ZERO, abandoned).await;

    let event = tokio::time::timeout(Duration::from_secs(5), inbox.recv())
        .await
        .expect("broadcast in time")
        .expect("event");
    assert_eq!(event.name(), "task:created");
    let tasks = harness.storage.list_tasks(todo.id).await.expect("tasks");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "orphaned caller");
}

#[tokio::test]
async fn reply_wraps_rejections() {
    let harness = Harness::new().await;
    let reply = MutationReply::from(
        harness
            .coordinator
            .submit(harness.origin(), MutationRequest::DeleteTask { task_id: TaskId(42) })
            .await,
    );
    assert!(matches!(reply, MutationReply::Rejected(ApiError { code: ErrorCode::NotFound, .. })));
}

enum Fault {
    Stall,
    Unavailable,
    Delay(Duration),
}

/// Serves reads from a real store and interferes with every write.
struct FaultyRepo {
    inner: Storage,
    fault: Fault,
}

impl FaultyRepo {
    /// Ok only when the write should go ahead after the delay.
    async fn interfere(&self) -> RepoResult<()> {
        match self.fault {
            Fault::Stall => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(RepoError::Timeout)
            }
            Fault::Unavailable => Err(RepoError::Unavailable("disk on fire".into())),
            Fault::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl BoardRepository for FaultyRepo {
    async fn health_check(&self) -> RepoResult<()> {
        self.interfere().await?;
        self.inner.health_check().await
    }
    async fn create_user(&self, username: &str) -> RepoResult<UserSummary> {
        self.inner.create_user(username).await
    }
    async fn get_user(&self, user_id: UserId) -> RepoResult<UserSummary> {
        self.inner.get_user(user_id).await
    }
    async fn create_board(&self, owner: UserId, board: NewBoard) -> RepoResult<Board> {
        self.inner.create_board(owner, board).await
    }
    async fn update_board(&self, board_id: BoardId, patch: BoardPatch) -> RepoResult<Board> {
        self.interfere().await?;
        self.inner.update_board(board_id, patch).await
    }
    async fn delete_board(&self, board_id: BoardId) -> RepoResult<()> {
        self.interfere().await?;
        self.inner.delete_board(board_id).await
    }
    async fn get_board(&self, board_id: BoardId) -> RepoResult<BoardSnapshot> {
        self.inner.get_board(board_id).await
    }
    async fn list_boards_for_user(&self, user_id: UserId) -> RepoResult<Vec<Board>> {
        self.inner.list_boards_for_user(user_id).await
    }
    async fn add_member(
        &self,
        board_id: BoardId,
        user_id: UserId,
        role: Role,
    ) -> RepoResult<BoardMember> {
        self.inner.add_member(board_id, user_id, role).await
    }
    async fn member_role(&self, board_id: BoardId, user_id: UserId) -> RepoResult<Option<Role>> {
        self.inner.member_role(board_id, user_id).await
    }
    async fn create_list(&self, list: NewList) -> RepoResult<List> {
        self.inner.create_list(list).await
    }
    async fn update_list(&self, list_id: ListId, patch: ListPatch) -> RepoResult<List> {
        self.interfere().await?;
        self.inner.update_list(list_id, patch).await
    }
    async fn delete_list(&self, list_id: ListId) -> RepoResult<List> {
        self.interfere().await?;
        self.inner.delete_list(list_id).await
    }
    async fn list_lists(&self, board_id: BoardId) -> RepoResult<Vec<List>> {
        self.inner.list_lists(board_id).await
    }
    async fn renumber_lists(
        &self,
        board_id: BoardId,
        positions: &[(ListId, f64)],
    ) -> RepoResult<Vec<List>> {
        self.interfere().await?;
        self.inner.renumber_lists(board_id, positions).await
    }
    async fn board_for_list(&self, list_id: ListId) -> RepoResult<BoardId> {
        self.inner.board_for_list(list_id).await
    }
    async fn create_task(&self, task: NewTask) -> RepoResult<Task> {
        self.interfere().await?;
        self.inner.create_task(task).await
    }
    async fn update_task(&self, task_id: TaskId, patch: TaskPatch) -> RepoResult<Task> {
        self.interfere().await?;
        self.inner.update_task(task_id, patch).await
    }
    async fn move_task(&self, task_id: TaskId, to: ListId, position: f64) -> RepoResult<Task> {
        self.interfere().await?;
        self.inner.move_task(task_id, to, position).await
    }
    async fn delete_task(&self, task_id: TaskId) -> RepoResult<Task> {
        self.interfere().await?;
        self.inner.delete_task(task_id).await
    }
    async fn get_task(&self, task_id: TaskId) -> RepoResult<Task> {
        self.inner.get_task(task_id).await
    }
    async fn list_tasks(&self, list_id: ListId) -> RepoResult<Vec<Task>> {
        self.inner.list_tasks(list_id).await
    }
    async fn renumber_tasks(
        &self,
        list_id: ListId,
        positions: &[(TaskId, f64)],
    ) -> RepoResult<Vec<Task>> {
        self.interfere().await?;
        self.inner.renumber_tasks(list_id, positions).await
    }
    async fn board_for_task(&self, task_id: TaskId) -> RepoResult<BoardId> {
        self.inner.board_for_task(task_id).await
    }
}

struct Fragile {
    coordinator: Coordinator,
    storage: Storage,
    owner: UserId,
    list_id: ListId,
    inbox: Inbox,
}

async fn faulty_harness(fault: Fault) -> Fragile {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let owner = storage.create_user("owner").await.expect("user");
    let board = storage
        .create_board(
            owner.id,
            NewBoard {
                name: "Fragile".into(),
                description: None,
                color: DEFAULT_BOARD_COLOR.into(),
            },
        )
        .await
        .expect("board");
    let list = storage
        .create_list(NewList {
            board_id: board.id,
            title: "Todo".into(),
            position: 0.0,
        })
        .await
        .expect("list");
    let registry = Arc::new(RoomRegistry::new());
    let broadcaster = Arc::new(Broadcaster::new(registry.clone()));
    let repo = FaultyRepo {
        inner: storage.clone(),
        fault,
    };
    let coordinator = Coordinator::new(
        Arc::new(repo),
        broadcaster,
        CoordinatorConfig {
            repo_timeout: Duration::from_millis(100),
            echo_to_originator: true,
        },
    );
    let (tx, inbox) = mpsc::channel(8);
    let watcher = registry.connect(tx);
    registry.join(watcher, board.id, PresenceUser::anonymous());
    Fragile {
        coordinator,
        storage,
        owner: owner.id,
        list_id: list.id,
        inbox,
    }
}

#[tokio::test]
async fn stalled_store_times_out_without_broadcasting() {
    let mut fragile = faulty_harness(Fault::Stall).await;

    let err = fragile
        .coordinator
        .submit(Origin::user(fragile.owner), create_task(fragile.list_id, "never"))
        .await
        .expect_err("timeout");
    assert_eq!(err.code, ErrorCode::Timeout);
    assert!(err.retryable());
    assert_eq!(fragile.coordinator.broadcaster().stats().published, 0);
    assert!(drain(&mut fragile.inbox).is_empty());
    assert!(fragile
        .storage
        .list_tasks(fragile.list_id)
        .await
        .expect("tasks")
        .is_empty());
}

#[tokio::test]
async fn late_commit_is_broadcast_after_the_caller_timed_out() {
    let mut fragile = faulty_harness(Fault::Delay(Duration::from_millis(300))).await;

    let err = fragile
        .coordinator
        .submit(Origin::user(fragile.owner), create_task(fragile.list_id, "slow"))
        .await
        .expect_err("timeout");
    assert_eq!(err.code, ErrorCode::Timeout);
    assert_eq!(fragile.coordinator.broadcaster().stats().published, 0);

    let event = tokio::time::timeout(Duration::from_secs(5), fragile.inbox.recv())
        .await
        .expect("late broadcast")
        .expect("event");
    let ServerEvent::TaskCreated { task, .. } = &*event else {
        panic!("expected task:created, got {event:?}");
    };
    assert_eq!(task.title, "slow");
    let tasks = fragile.storage.list_tasks(fragile.list_id).await.expect("tasks");
    assert_eq!(tasks.iter().map(|t| t.id).collect::<Vec<_>>(), vec![task.id]);
}

#[tokio::test]
async fn unavailable_store_is_reported_as_retryable() {
    let fragile = faulty_harness(Fault::Unavailable).await;

    let err = fragile
        .coordinator
        .apply(
            Origin::user(fragile.owner),
            MutationRequest::DeleteList {
                list_id: fragile.list_id,
            },
        )
        .await
        .expect_err("unavailable");
    assert_eq!(err.code, ErrorCode::Unavailable);
    assert!(err.retryable());
    assert_eq!(fragile.coordinator.broadcaster().stats().published, 0);

    let err = fragile.coordinator.health().await.expect_err("health");
    assert_eq!(err.code, ErrorCode::Unavailable);
}
