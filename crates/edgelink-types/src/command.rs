//! Numeric codes carried in the `code` field of client envelopes.

use serde::{Deserialize, Serialize};

/// Commands a connected client may send to the gateway.
///
/// The set is closed: every variant must have a handler bound in the
/// dispatch table before the gateway starts serving sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
#[repr(u32)]
pub enum CommandCode {
    /// Upgrade the image backing a driver library.
    UpgradeDriverImage = 10001,
    /// Start or stop a driver instance.
    DriverRunStatus = 10002,
    /// Switch the display language of the session.
    ChangeLanguage = 10003,
    /// Start or stop streaming the log of a driver instance.
    DriverLogTail = 10004,
    /// Delete a driver instance.
    DeleteDriverInstance = 10005,
}

impl CommandCode {
    /// Every recognized command code.
    pub const ALL: [CommandCode; 5] = [
        CommandCode::UpgradeDriverImage,
        CommandCode::DriverRunStatus,
        CommandCode::ChangeLanguage,
        CommandCode::DriverLogTail,
        CommandCode::DeleteDriverInstance,
    ];

    /// Converts a raw wire value to a command code.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            10001 => Some(Self::UpgradeDriverImage),
            10002 => Some(Self::DriverRunStatus),
            10003 => Some(Self::ChangeLanguage),
            10004 => Some(Self::DriverLogTail),
            10005 => Some(Self::DeleteDriverInstance),
            _ => None,
        }
    }

    /// Returns the raw wire value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl From<CommandCode> for u32 {
    fn from(code: CommandCode) -> Self {
        code.as_u32()
    }
}

impl TryFrom<u32> for CommandCode {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_u32(value).ok_or_else(|| format!("unknown command code {}", value))
    }
}

impl std::fmt::Display for CommandCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandCode::UpgradeDriverImage => write!(f, "driver.upgrade"),
            CommandCode::DriverRunStatus => write!(f, "driver.run_status"),
            CommandCode::ChangeLanguage => write!(f, "session.language"),
            CommandCode::DriverLogTail => write!(f, "driver.log_tail"),
            CommandCode::DeleteDriverInstance => write!(f, "driver.delete"),
        }
    }
}

/// Codes of messages the gateway pushes without a preceding command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PushCode {
    /// A driver instance changed its run status.
    DriverStatusChanged = 20001,
    /// A device went online or offline.
    DeviceStatusChanged = 20002,
    /// Progress of a driver image download or upgrade.
    ImageProgress = 20003,
    /// A message arrived on the broker's inbound topic.
    BrokerMessage = 20004,
    /// One line of a tailed driver log.
    LogLine = 20005,
}

impl PushCode {
    /// Returns the raw wire value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl From<PushCode> for u32 {
    fn from(code: PushCode) -> Self {
        code.as_u32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_code_roundtrip() {
        for code in CommandCode::ALL {
            assert_eq!(CommandCode::from_u32(code.as_u32()), Some(code));
        }
    }

    #[test]
    fn test_unknown_command_code() {
        assert_eq!(CommandCode::from_u32(0), None);
        assert_eq!(CommandCode::from_u32(10006), None);
        assert!(CommandCode::try_from(42).is_err());
    }

    #[test]
    fn test_command_code_serializes_as_number() {
        let json = serde_json::to_string(&CommandCode::ChangeLanguage).unwrap();
        assert_eq!(json, "10003");

        let parsed: CommandCode = serde_json::from_str("10005").unwrap();
        assert_eq!(parsed, CommandCode::DeleteDriverInstance);
    }

    #[test]
    fn test_push_codes_do_not_collide_with_commands() {
        let pushes = [
            PushCode::DriverStatusChanged,
            PushCode::DeviceStatusChanged,
            PushCode::ImageProgress,
            PushCode::BrokerMessage,
            PushCode::LogLine,
        ];
        for push in pushes {
            assert!(CommandCode::from_u32(push.as_u32()).is_none());
        }
    }
}
