pub mod clock;
pub mod error;
pub mod scheduler;
pub mod session;
pub mod timer;

pub use error::SyncError;
pub use session::{Session, SnapshotAction};
