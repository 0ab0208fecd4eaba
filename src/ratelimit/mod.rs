//! Sliding-window rate limiting and state management.

mod clock;
mod key;
mod sweeper;
mod table;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::ClientKey;
pub use sweeper::{spawn_sweeper, SweeperHandle};
pub use table::RateTable;
pub use window::{CallHistory, Decision, RejectedCalls, WindowPolicy};
