/// Database primary keys of users, templates, and output records.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Ledger amounts are whole credits.
pub type Credits = i64;

/// Parameter name -> value, as supplied by the requester or applied to a template.
pub type JobParameters = std::collections::HashMap<String, serde_json::Value>;
