pub mod clock;
pub mod error;
pub mod locks;
pub mod retry;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{AppError, BindFailure, ErrorKind};
pub use locks::KeyedLocks;
pub use retry::with_conflict_retries;
