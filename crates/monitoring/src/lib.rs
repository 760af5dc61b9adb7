//! Watching disposable addresses for incoming payments.
//!
//! Each payment session gets its own [`PaymentMonitor`] task, supervised by
//! the [`MonitorRegistry`]. The [`ExpiredWalletReaper`] recovers funds that
//! arrive after a session stopped watching.

mod monitor;
mod reaper;
mod registry;
mod tolerance;

pub use monitor::{MonitorContext, MonitorOutcome, PaymentMonitor};
pub use reaper::{ExpiredWalletReaper, ReapReport};
pub use registry::MonitorRegistry;
pub use tolerance::{Decision, ToleranceRules};
