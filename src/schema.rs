//! Database schema definitions
//!
//! Constants for table and column names used with rusqlite. The DDL itself
//! lives in the SQL files under `migrations/`.

/// Contacts table schema
pub mod contacts {
    /// Table name
    pub const TABLE: &str = "contacts";
    /// Primary key column
    pub const ID: &str = "id";
    /// Display name column
    pub const NAME: &str = "name";
    /// Normalized phone number column (unique)
    pub const PHONE_NUMBER: &str = "phone_number";
    /// Trust status column (known, unknown, blocked)
    pub const STATUS: &str = "status";
}

/// Messages table schema
pub mod messages {
    /// Table name
    pub const TABLE: &str = "messages";
    /// Primary key column, doubles as the insertion sequence
    pub const ID: &str = "id";
    /// Foreign key to contacts table
    pub const CONTACT_ID: &str = "contact_id";
    /// Message text content column
    pub const CONTENT: &str = "content";
    /// Source clock timestamp (milliseconds) column
    pub const TIMESTAMP: &str = "timestamp";
    /// Direction column (incoming, outgoing)
    pub const DIRECTION: &str = "direction";
    /// Classification status column (unchecked, safe, spam)
    pub const STATUS: &str = "status";
    /// Normalized phone number column
    pub const PHONE_NUMBER: &str = "phone_number";
}

/// Key/value application state
pub mod app_state {
    /// Table name
    pub const TABLE: &str = "app_state";
    /// Key column
    pub const KEY: &str = "key";
    /// Value column
    pub const VALUE: &str = "value";

    /// Set once the first-run bulk import has finished
    pub const BULK_IMPORT_DONE: &str = "bulk_import_done";
}
