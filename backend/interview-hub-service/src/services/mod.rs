pub mod lifecycle;
pub mod router;
pub mod sequence;

pub use lifecycle::SessionLifecycleCoordinator;
pub use router::BroadcastRouter;
pub use sequence::{SequenceAllocator, SessionLease};
