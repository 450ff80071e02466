pub mod reporter;

pub use reporter::{ServerStats, StatsReporter, StatsSnapshot};
