//! Boundary between the forecast pipeline and the automation host that owns
//! settings, variables, status and the poll timer.

use std::time::Duration;

use crate::config::{Installation, Location};
use crate::models::forecast::{InstanceStatus, VariableUpdate};

pub trait Host: Send + Sync {
    /// Stored installation settings
    fn installation(&self) -> Installation;

    /// Site coordinates from the host's location service
    fn location(&self) -> Location;

    /// Creates the variable if absent, updates it otherwise
    fn upsert_variable(&self, update: VariableUpdate);

    fn set_status(&self, status: InstanceStatus);

    /// Arms the recurring poll timer with the given interval; `None` stops it.
    fn set_timer(&self, interval: Option<Duration>);
}
