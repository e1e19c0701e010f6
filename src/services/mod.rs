pub mod classes;
pub mod fanout;
pub mod retry;
pub mod scheduler;
pub mod slug;
pub mod sync_engine;

pub use classes::ClassService;
pub use fanout::ClassFanoutAssigner;
pub use retry::RetryPolicy;
pub use scheduler::ReconcileScheduler;
pub use slug::SlugAllocator;
pub use sync_engine::{ReconcileStats, Reconciled, SyncEngine, UpsertOutcome};
