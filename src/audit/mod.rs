// Audit module
//
// Append-only record of security relevant actions, shown in the System Logs view

pub mod log;

pub use self::log::{AuditAction, AuditLog, LogEntry, LogStatus};
