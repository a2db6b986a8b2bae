// Terminal and JSON output helpers

use crate::error::PreachError;
use std::io::IsTerminal;

// Colors for terminal output (when supported)
pub const RED: &str = "\x1b[0;31m";
pub const GREEN: &str = "\x1b[0;32m";
pub const YELLOW: &str = "\x1b[1;33m";
pub const MAGENTA: &str = "\x1b[0;35m";
pub const BOLD: &str = "\x1b[1m";
pub const NC: &str = "\x1b[0m"; // No Color

/// Check if stdout is a terminal (for color output)
#[inline]
pub fn is_terminal() -> bool {
    std::io::stdout().is_terminal()
}

fn paint(color: &'static str) -> (&'static str, &'static str) {
    if is_terminal() {
        (color, NC)
    } else {
        ("", "")
    }
}

/// Print info message
pub fn info(msg: &str) {
    let (color, reset) = paint(GREEN);
    println!("{}[INFO]{} {}", color, reset, msg);
}

/// Print warning message
pub fn warn(msg: &str) {
    let (color, reset) = paint(YELLOW);
    eprintln!("{}[WARN]{} {}", color, reset, msg);
}

/// Print error message
pub fn error(msg: &str) {
    let (color, reset) = paint(RED);
    eprintln!("{}[ERROR]{} {}", color, reset, msg);
}

/// Print success message
pub fn success(msg: &str) {
    let (color, reset) = paint(MAGENTA);
    println!("{}[OK]{} {}", color, reset, msg);
}

/// Print section header
pub fn header(msg: &str) {
    let (bold, reset) = paint(BOLD);
    println!("{}===>{} {}", bold, reset, msg);
    println!();
}

/// Exit codes
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_FILE_NOT_FOUND: i32 = 4;
pub const EXIT_VALIDATION: i32 = 5;
pub const EXIT_NOT_FOUND: i32 = 6;

/// Exit with usage error
pub fn exit_usage(msg: &str) -> ! {
    error(msg);
    std::process::exit(EXIT_USAGE);
}

/// Exit with file not found error
pub fn exit_file_not_found(path: &str) -> ! {
    error(&format!("File not found: {}", path));
    std::process::exit(EXIT_FILE_NOT_FOUND);
}

// ============================================================================
// Error Codes and Remediation
// ============================================================================

/// Error codes for JSON error responses
pub const E_INPUT_NOT_FOUND: &str = "E001";
pub const E_FUNCTION_NOT_FOUND: &str = "E002";
pub const E_ROOT_NOT_FOUND: &str = "E003";
pub const E_INVALID_CONFIG: &str = "E004";
pub const E_SEARCH_FAILED: &str = "E005";

/// Common remediation messages
pub const R_HINT_FUNCTION_MAP: &str = "Check the function map (<cfg>_func_map) or pass --root ID";
pub const R_HINT_CFG_SUMMARY: &str = "Run 'preach cfg --cfg FILE' to inspect the parsed graph";

/// JSON output wrapper
#[derive(Debug, Clone, serde::Serialize)]
pub struct JsonResponse<T> {
    pub schema_version: String,
    pub execution_id: String,
    pub tool: String,
    pub timestamp: String,
    pub data: T,
}

impl<T: serde::Serialize> JsonResponse<T> {
    pub fn new(data: T) -> Self {
        let now = chrono::Utc::now();
        let exec_id = format!("{:x}-{}", now.timestamp(), std::process::id());

        JsonResponse {
            schema_version: "1.0.0".to_string(),
            execution_id: exec_id,
            tool: "preach".to_string(),
            timestamp: now.to_rfc3339(),
            data,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Error response format for JSON mode
#[derive(Debug, Clone, serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub message: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl JsonError {
    pub fn new(category: &str, message: &str, code: &str) -> Self {
        JsonError {
            error: category.to_string(),
            message: message.to_string(),
            code: code.to_string(),
            remediation: None,
        }
    }

    pub fn with_remediation(mut self, remediation: &str) -> Self {
        self.remediation = Some(remediation.to_string());
        self
    }

    /// Input file or directory missing
    pub fn input_not_found(path: &str) -> Self {
        Self::new(
            "InputNotFound",
            &format!("File not found: {}", path),
            E_INPUT_NOT_FOUND,
        )
    }

    /// Search failed part-way (I/O while writing records)
    pub fn search_failed(message: &str) -> Self {
        Self::new("SearchFailed", message, E_SEARCH_FAILED)
    }

    /// Map a library configuration error
    pub fn from_preach_error(err: &PreachError) -> Self {
        let message = err.to_string();
        match err {
            PreachError::UnknownFunction(_) => {
                Self::new(err.category(), &message, E_FUNCTION_NOT_FOUND)
                    .with_remediation(R_HINT_FUNCTION_MAP)
            }
            PreachError::RootNotFound(_) => Self::new(err.category(), &message, E_ROOT_NOT_FOUND)
                .with_remediation(R_HINT_CFG_SUMMARY),
            _ => Self::new(err.category(), &message, E_INVALID_CONFIG),
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self.code.as_str() {
            E_INPUT_NOT_FOUND => EXIT_FILE_NOT_FOUND,
            E_FUNCTION_NOT_FOUND | E_ROOT_NOT_FOUND => EXIT_NOT_FOUND,
            E_INVALID_CONFIG => EXIT_VALIDATION,
            _ => EXIT_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_response() {
        let data = vec!["item1", "item2"];
        let response = JsonResponse::new(data);
        let json = response.to_json();
        assert!(json.contains("\"tool\":\"preach\""));
        assert!(json.contains("\"data\":[\"item1\",\"item2\"]"));
    }

    #[test]
    fn test_json_error_from_preach_error() {
        let err = JsonError::from_preach_error(&PreachError::UnknownFunction("main".into()));
        assert_eq!(err.code, E_FUNCTION_NOT_FOUND);
        assert_eq!(err.error, "FunctionNotFound");
        assert!(err.remediation.is_some());
        assert_eq!(err.exit_code(), EXIT_NOT_FOUND);

        let err = JsonError::from_preach_error(&PreachError::ZeroMaxDepth);
        assert_eq!(err.code, E_INVALID_CONFIG);
        assert_eq!(err.exit_code(), EXIT_VALIDATION);
    }

    #[test]
    fn test_json_error_skips_empty_remediation() {
        let json = serde_json::to_string(&JsonError::input_not_found("cfg.txt")).unwrap();
        assert!(!json.contains("remediation"));
        assert_eq!(JsonError::input_not_found("x").exit_code(), EXIT_FILE_NOT_FOUND);
    }
}
