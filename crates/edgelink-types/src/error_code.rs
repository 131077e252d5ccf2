//! Numeric error codes reported in `WsResult::error_code`.
//!
//! The translation catalog keys localized messages by these values.

/// No error.
pub const SUCCESS: u32 = 0;
/// Unclassified internal failure.
pub const SYSTEM_ERROR: u32 = 10001;
/// The command payload did not have the required shape.
pub const INVALID_PARAMS: u32 = 10002;
/// The referenced record does not exist.
pub const RECORD_NOT_FOUND: u32 = 10003;
/// The requested display language is not available.
pub const LANGUAGE_NOT_SUPPORTED: u32 = 10004;
/// The referenced driver library does not exist.
pub const DRIVER_NOT_FOUND: u32 = 20101;
/// The driver image could not be upgraded.
pub const DRIVER_UPGRADE_FAILED: u32 = 20102;
/// The driver instance must be stopped first.
pub const DRIVER_INSTANCE_RUNNING: u32 = 20103;
/// The driver log could not be tailed.
pub const LOG_TAIL_FAILED: u32 = 20104;
/// The message broker connection failed.
pub const BROKER_CONN_FAIL: u32 = 30101;

/// Every code with a catalog entry.
pub const ALL: [u32; 10] = [
    SUCCESS,
    SYSTEM_ERROR,
    INVALID_PARAMS,
    RECORD_NOT_FOUND,
    LANGUAGE_NOT_SUPPORTED,
    DRIVER_NOT_FOUND,
    DRIVER_UPGRADE_FAILED,
    DRIVER_INSTANCE_RUNNING,
    LOG_TAIL_FAILED,
    BROKER_CONN_FAIL,
];
