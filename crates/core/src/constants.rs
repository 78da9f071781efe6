/// Constants used throughout the utilz codebase
// Environment variable names
pub const UTILZ_GROUP_CAPACITY_VAR: &str = "UTILZ_GROUP_CAPACITY";
pub const UTILZ_GROUP_NAME_VAR: &str = "UTILZ_GROUP_NAME";
pub const UTILZ_LOG_VAR: &str = "UTILZ_LOG";

// Used when the host cannot report its available parallelism
pub const DEFAULT_GROUP_CAPACITY: usize = 4;

pub const DEFAULT_GROUP_NAME: &str = "task_group";

pub const DEFAULT_LOG_FILTER: &str = "info";
