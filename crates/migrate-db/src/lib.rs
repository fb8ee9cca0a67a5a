pub mod database;
pub mod executor;
pub mod migrator;
pub mod registry;
pub mod splitter;
pub mod tracker;
pub mod unit;
pub mod watchdog;

pub use database::{open_database, open_database_read_only, open_in_memory, open_path};
pub use executor::{Executor, RunOptions, RunReport, UnitFailure};
pub use migrator::{Migrator, UnitState, UnitStatus};
pub use registry::{DiscoveredFile, Registry, discover};
pub use splitter::{SplitError, split_statements};
pub use tracker::{AppliedRecord, Tracker};
pub use unit::{Migration, MigrationUnit};
