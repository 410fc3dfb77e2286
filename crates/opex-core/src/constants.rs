/// Engine configuration constants

/// Comment written on steps that were approved by skip
pub const SKIPPED_COMMENT: &str = "skipped - condition not applicable";

/// Default upper bound for a single durable-store call
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;

/// Default data directory for the file-backed store
pub const DEFAULT_DATA_DIR: &str = "/data/opex";

/// Zero-padding widths of the identifier's sequence components
pub const DISCIPLINE_SEQ_WIDTH: usize = 2;
pub const OVERALL_SEQ_WIDTH: usize = 3;
