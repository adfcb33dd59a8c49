//! Process exit codes per failure class

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Input error - unreadable or invalid module file, config or values
pub const INPUT_ERROR: i32 = 2;

/// Template error - rendering failed
pub const TEMPLATE_ERROR: i32 = 3;

/// Source error - the template could not be resolved or fetched
pub const SOURCE_ERROR: i32 = 4;

/// Cluster error - the API server rejected or could not serve a request
pub const CLUSTER_ERROR: i32 = 5;

/// Apply error - some objects were not applied or pruned
pub const APPLY_ERROR: i32 = 6;
