//! Domain model (ids, priority, status, task record, filter).

pub mod filter;
pub mod ids;
pub mod priority;
pub mod status;
pub mod task;

pub use filter::TaskFilter;
pub use ids::TaskId;
pub use priority::Priority;
pub use status::TaskStatus;
pub use task::Task;
