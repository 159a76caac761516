//! Entries of the instrument's error queue.

use std::{fmt, str::FromStr};

use instrumentrs::InstrumentError;

/// Query that pops the next entry from the error queue.
pub(crate) const NEXT_ERROR_QUERY: &str = ":SYST:ERR:NEXT?";

/// Maximum number of queries in one drain of the error queue.
pub const MAX_ERROR_QUERIES: usize = 50;

/// One entry that the instrument reported in its error queue.
///
/// The instrument replies to `:SYST:ERR:NEXT?` with `<code>,"<message>"`. Code `0` means that the
/// queue is empty. Device errors are not fatal, they are recorded in the
/// [`crate::SystemState`] error log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceError {
    /// The SCPI error code, negative for standard errors.
    pub code: i32,
    /// The message without surrounding quotes.
    pub message: String,
}

impl DeviceError {
    /// Returns `true` if this entry marks an empty queue.
    pub fn is_no_error(&self) -> bool {
        self.code == 0
    }
}

impl FromStr for DeviceError {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (code, message) = s
            .trim()
            .split_once(',')
            .ok_or_else(|| InstrumentError::ResponseParseError(s.to_string()))?;
        let code = code
            .trim()
            .trim_start_matches('"')
            .parse::<i32>()
            .map_err(|_| InstrumentError::ResponseParseError(s.to_string()))?;
        Ok(DeviceError {
            code,
            message: message.trim().trim_matches('"').to_string(),
        })
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_error() {
        let err: DeviceError = "-113,\"Undefined header\"".parse().unwrap();
        assert_eq!(err.code, -113);
        assert_eq!(err.message, "Undefined header");
        assert!(!err.is_no_error());
        assert_eq!(err.to_string(), "-113: Undefined header");
    }

    #[test]
    fn test_parse_no_error() {
        let err: DeviceError = "0,\"No error\"".parse().unwrap();
        assert!(err.is_no_error());
    }

    #[test]
    fn test_message_may_contain_commas() {
        let err: DeviceError = "-222,\"Data out of range, CH1\"".parse().unwrap();
        assert_eq!(err.message, "Data out of range, CH1");
    }

    #[test]
    fn test_parse_garbage() {
        assert!("No error".parse::<DeviceError>().is_err());
        assert!("x,\"No error\"".parse::<DeviceError>().is_err());
    }
}
