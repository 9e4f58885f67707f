//! Offline-first sync core and recurring-event projection engine for a
//! personal finance ledger.

pub mod insights;
pub mod ledger;
pub mod model;
pub mod projection;
pub mod store;
pub mod sync;

pub use insights::{month_report, MonthReport, Signal};
pub use ledger::Ledger;
pub use model::{Dataset, FieldValue, Fields, PendingAction};
pub use projection::{project_month, MonthEvent};
pub use store::{LocalStore, MemoryLocalStore, MemoryRemoteStore, RemoteStore};
pub use sync::scheduler::AutoSync;
pub use sync::{SyncConfig, SyncEngine, SyncStatus};
