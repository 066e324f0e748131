pub mod delivery;
pub mod queue;
pub mod task;
pub mod work;

pub use delivery::{LogDelivery, RemoteDelivery, TaskDelivery};
pub use queue::{task_work, QueueSettings, TaskProgress, TaskQueue, TaskWork};
pub use task::{SubmitAck, Task, TaskEvent, TaskKind, TaskStatus, TaskSubmission};
pub use work::{action_work, ActionRequest};
