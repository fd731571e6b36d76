//! Error types for style backends.
//!
//! The process backend distinguishes "could not start", "ran but failed" and
//! "ran too long" so that callers never mistake a failed run for an empty reply.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("external program exited with {}", describe_exit(.exit_code, .diagnostic))]
    Exited {
        exit_code: Option<i32>,
        diagnostic: String,
    },

    #[error("external program timed out after {limit:?}")]
    Timeout { limit: std::time::Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("no style data found for user '{user_id}'. Seed the user's style first")]
    NoStyle { user_id: String },

    #[error("API request failed: {message}")]
    Api { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol error: {message}")]
    Protocol { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput {
            message: message.into(),
        }
    }

    pub fn api(message: impl Into<String>) -> Self {
        Error::Api {
            message: message.into(),
        }
    }
}

fn describe_exit(exit_code: &Option<i32>, diagnostic: &str) -> String {
    let status = match exit_code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    };
    if diagnostic.is_empty() {
        status
    } else {
        format!("{}: {}", status, diagnostic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exited_display_with_code() {
        let err = Error::Exited {
            exit_code: Some(2),
            diagnostic: "no such user".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "external program exited with status 2: no such user"
        );
    }

    #[test]
    fn test_exited_display_signal() {
        let err = Error::Exited {
            exit_code: None,
            diagnostic: String::new(),
        };
        assert!(err.to_string().contains("terminated by signal"));
        assert!(!err.to_string().ends_with(':'));
    }

    #[test]
    fn test_exited_display_without_diagnostic() {
        let err = Error::Exited {
            exit_code: Some(3),
            diagnostic: String::new(),
        };
        assert_eq!(err.to_string(), "external program exited with status 3");
    }

    #[test]
    fn test_timeout_display_keeps_subsecond_limits() {
        let err = Error::Timeout {
            limit: std::time::Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "external program timed out after 250ms");
    }
}
