mod estimator;
mod history;
mod monitor;

pub use estimator::{Estimator, ResourceEstimate};
pub use history::{HistoryEntry, HistoryStore, JsonHistoryStore};
pub use monitor::{Capacity, ResourceMonitor, SysinfoMonitor, Usage};
