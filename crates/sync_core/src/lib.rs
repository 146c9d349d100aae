//! Room membership, event fan-out and the mutation path that ties the
//! repository to live board rooms.

pub mod broadcast;
pub mod coordinator;
pub mod registry;

pub use broadcast::{BroadcastStats, Broadcaster};
pub use coordinator::{Coordinator, CoordinatorConfig, Origin};
pub use registry::{JoinOutcome, Outbox, RoomRegistry};
