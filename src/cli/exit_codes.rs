//! process exit codes, so scripts can tell a miss from a broken config

pub const SUCCESS: i32 = 0;

/// anything not covered below
pub const ERROR: i32 = 1;

/// the selector compiled but matched nothing
pub const NO_MATCH: i32 = 2;

/// rejected command-line arguments
pub const INVALID_ARGS: i32 = 4;

/// config missing, unparsable or holding invalid rules
pub const CONFIG_ERROR: i32 = 5;

pub const COMPILE_ERROR: i32 = 6;
