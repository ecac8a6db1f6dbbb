//! Constants used throughout the EMTCT core crate.

/// Stage selected when none is configured.
pub const DEFAULT_STAGE: &str = "dev";

/// Default path of the clinical source-of-record database.
pub const DEFAULT_SOURCE_DB_PATH: &str = "data/source.db";

/// Default path of the application's mirror registry database.
pub const DEFAULT_MIRROR_DB_PATH: &str = "data/mirror.db";

/// Default width of the per-order sample lookup pool.
pub const DEFAULT_SAMPLE_WORKERS: usize = 4;
