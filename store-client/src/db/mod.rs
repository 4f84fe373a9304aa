pub mod image_queries;
pub mod plant_queries;

/// Rows per INSERT statement. Keeps every statement below the PostgreSQL limit of
/// 65535 bind parameters for the widest table (five columns).
pub(crate) const MAX_ROWS_PER_STATEMENT: usize = 10_000;
