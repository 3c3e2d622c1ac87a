//! Domain-level constants.
//!
//! Centralized location for magic values shared by the persistence layer
//! and the CLI.

// =============================================================================
// Bulk Writing
// =============================================================================

/// Number of entities written per bulk batch. Fixed, not configurable per call.
pub const BULK_WRITE_BATCH_SIZE: usize = 1000;

/// Upper bound of bind parameters per generated INSERT statement.
///
/// SQLite caps host parameters at 32766, Postgres at 65535.
pub const MAX_INSERT_PARAMETERS: usize = 30_000;

// =============================================================================
// Database
// =============================================================================

/// Default pool size
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default idle connections kept open
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;

/// Default connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 8;

// =============================================================================
// Document Store
// =============================================================================

/// Default logical database (key prefix) for documents
pub const DEFAULT_DOCUMENT_DATABASE: &str = "x3";

/// Separator between key segments of a document collection
pub const DOCUMENT_KEY_SEPARATOR: &str = ":";

// =============================================================================
// Sample Data
// =============================================================================

/// Table backing the sample `person` entity
pub const PERSON_TABLE: &str = "person";

/// Document collection backing the sample `person` entity
pub const PERSON_COLLECTION: &str = "people";
