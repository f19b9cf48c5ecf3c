//! Pure scheduling core for the tornbot daemon.
//!
//! Nothing in this crate performs I/O. The daemon produces snapshots and probe
//! results, and this crate decides what to attempt and how to react to outcomes.

pub mod backoff;
pub mod eligibility;
pub mod error;
pub mod model;
pub mod outcomes;
pub mod retry;
pub mod snapshot;
pub mod time;

pub use backoff::*;
pub use eligibility::*;
pub use error::*;
pub use model::*;
pub use outcomes::*;
pub use retry::*;
pub use snapshot::*;
pub use time::*;
