//! Request and reply types shared by the backends, the daemon and the client.
//!
//! A [`Request`] maps one-to-one onto the positional argument list of the
//! external engine. The daemon carries the same types as JSON over a Unix
//! domain socket.

use crate::error::Error;
use serde::{Deserialize, Serialize};

/// One call into a style backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Record writing samples for a user.
    Seed {
        user_id: String,
        samples: Vec<String>,
    },
    /// Draft an email in the user's style.
    Generate { user_id: String, prompt: String },
    /// Summarize a list of nudges.
    NudgeSummary {
        user_id: String,
        prompt: String,
        nudges: Vec<String>,
    },
    /// Draft an email addressing a list of nudges.
    NudgeEmail {
        user_id: String,
        prompt: String,
        nudges: Vec<String>,
    },
}

impl Request {
    /// Subcommand name understood by the external engine.
    pub fn subcommand(&self) -> &'static str {
        match self {
            Request::Seed { .. } => "seed",
            Request::Generate { .. } => "generate",
            Request::NudgeSummary { .. } => "nudge",
            Request::NudgeEmail { .. } => "nudge-email",
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Request::Seed { user_id, .. }
            | Request::Generate { user_id, .. }
            | Request::NudgeSummary { user_id, .. }
            | Request::NudgeEmail { user_id, .. } => user_id,
        }
    }

    /// Positional arguments, subcommand first. Values are passed through
    /// untouched; no quoting or escaping happens here.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![self.subcommand().to_string(), self.user_id().to_string()];
        match self {
            Request::Seed { samples, .. } => args.extend(samples.iter().cloned()),
            Request::Generate { prompt, .. } => args.push(prompt.clone()),
            Request::NudgeSummary { prompt, nudges, .. }
            | Request::NudgeEmail { prompt, nudges, .. } => {
                args.push(prompt.clone());
                args.extend(nudges.iter().cloned());
            }
        }
        args
    }
}

/// Outcome of a completed call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Reply {
    /// Captured output, trimmed.
    pub text: String,
    /// Exit status of the external process, if there was one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Captured error-stream text, trimmed.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub diagnostic: String,
}

impl Reply {
    /// A reply produced in-process, with no exit status.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            exit_code: None,
            diagnostic: String::new(),
        }
    }

    /// Build a reply from raw process output.
    pub fn from_output(stdout: &[u8], stderr: &[u8], exit_code: Option<i32>) -> Self {
        Self {
            text: String::from_utf8_lossy(stdout).trim().to_string(),
            exit_code,
            diagnostic: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }
}

/// A generated email split into subject and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailDraft {
    pub subject: String,
    pub body: String,
}

impl EmailDraft {
    /// Pull a `Subject:` line out of generated text. Everything else is body.
    pub fn parse(text: &str) -> Self {
        let is_subject = |line: &str| line.trim_start().to_lowercase().starts_with("subject:");

        let subject = text
            .lines()
            .find(|line| is_subject(*line))
            .and_then(|line| line.split_once(':'))
            .map(|(_, s)| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "No Subject".to_string());

        let body = text
            .lines()
            .filter(|line| !is_subject(*line))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        Self { subject, body }
    }
}

/// Response sent from daemon to client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    /// The reply, if the call succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Reply>,
    /// Exit status attached to a failed external run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Error-stream text of a failed external run.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub diagnostic: String,
    /// Error message, if the call failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the failure was the external program exiting unsuccessfully.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exited: bool,
}

impl Response {
    pub fn success(reply: Reply) -> Self {
        Self {
            output: Some(reply),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Convert a backend error, keeping the exit status and diagnostic text.
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::Exited {
                exit_code,
                diagnostic,
            } => Self {
                exit_code: *exit_code,
                diagnostic: diagnostic.clone(),
                error: Some(err.to_string()),
                exited: true,
                ..Self::default()
            },
            other => Self::error(other.to_string()),
        }
    }

    /// Turn the response back into a backend result on the client side.
    pub fn into_result(self) -> crate::error::Result<Reply> {
        if let Some(reply) = self.output {
            return Ok(reply);
        }
        if self.exited {
            return Err(Error::Exited {
                exit_code: self.exit_code,
                diagnostic: self.diagnostic,
            });
        }
        Err(Error::Protocol {
            message: self
                .error
                .unwrap_or_else(|| "invalid response from daemon".to_string()),
        })
    }
}

/// Message type for IPC communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// A backend call from the client.
    Request(Request),
    /// Request daemon status.
    Status,
    /// Shutdown the daemon gracefully.
    Shutdown,
}

/// Framing for messages: length-prefixed JSON.
/// Format: 4 bytes (big-endian u32) length + JSON payload
pub mod framing {
    use anyhow::{anyhow, Result};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Largest accepted payload. Seeding many samples can get big.
    pub const MAX_MESSAGE_BYTES: usize = 1_000_000;

    /// Write a length-prefixed message.
    pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
    where
        W: AsyncWriteExt + Unpin,
        T: serde::Serialize,
    {
        let json = serde_json::to_vec(message)?;
        if json.len() > MAX_MESSAGE_BYTES {
            return Err(anyhow!("Message too large: {} bytes", json.len()));
        }
        let len = json.len() as u32;
        writer.write_all(&len.to_be_bytes()).await?;
        writer.write_all(&json).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read a length-prefixed message.
    pub async fn read_message<R, T>(reader: &mut R) -> Result<T>
    where
        R: AsyncReadExt + Unpin,
        T: serde::de::DeserializeOwned,
    {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;

        if len > MAX_MESSAGE_BYTES {
            return Err(anyhow!("Message too large: {} bytes", len));
        }

        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        let message = serde_json::from_slice(&buf)?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_args_keep_order() {
        let req = Request::Seed {
            user_id: "alice".to_string(),
            samples: vec![
                "Hi there, best regards".to_string(),
                "Thanks, talk soon".to_string(),
            ],
        };
        assert_eq!(
            req.args(),
            vec!["seed", "alice", "Hi there, best regards", "Thanks, talk soon"]
        );
    }

    #[test]
    fn test_seed_args_without_samples() {
        let req = Request::Seed {
            user_id: "alice".to_string(),
            samples: vec![],
        };
        assert_eq!(req.args(), vec!["seed", "alice"]);
    }

    #[test]
    fn test_generate_args() {
        let req = Request::Generate {
            user_id: "bob".to_string(),
            prompt: "write a follow-up".to_string(),
        };
        assert_eq!(req.args(), vec!["generate", "bob", "write a follow-up"]);
    }

    #[test]
    fn test_nudge_args() {
        let req = Request::NudgeEmail {
            user_id: "carol".to_string(),
            prompt: "be kind".to_string(),
            nudges: vec!["one-on-one".to_string(), "recognition".to_string()],
        };
        assert_eq!(
            req.args(),
            vec!["nudge-email", "carol", "be kind", "one-on-one", "recognition"]
        );
    }

    #[test]
    fn test_args_are_not_escaped() {
        let req = Request::Generate {
            user_id: "--help".to_string(),
            prompt: "a \"quoted\" $VAR".to_string(),
        };
        assert_eq!(req.args()[1], "--help");
        assert_eq!(req.args()[2], "a \"quoted\" $VAR");
    }

    #[test]
    fn test_reply_trims_output() {
        let reply = Reply::from_output(b"\nDear team,\n...\n", b"  warn \n", Some(0));
        assert_eq!(reply.text, "Dear team,\n...");
        assert_eq!(reply.diagnostic, "warn");
        assert_eq!(reply.exit_code, Some(0));
    }

    #[test]
    fn test_email_draft_with_subject() {
        let draft = EmailDraft::parse("Subject: Next steps\n\nHi Sally,\nLet's meet.");
        assert_eq!(draft.subject, "Next steps");
        assert_eq!(draft.body, "Hi Sally,\nLet's meet.");
    }

    #[test]
    fn test_email_draft_without_subject() {
        let draft = EmailDraft::parse("Hi Sally,\nThanks.");
        assert_eq!(draft.subject, "No Subject");
        assert_eq!(draft.body, "Hi Sally,\nThanks.");
    }

    #[test]
    fn test_response_roundtrips_exit_failure() {
        let err = Error::Exited {
            exit_code: Some(3),
            diagnostic: "boom".to_string(),
        };
        let resp = Response::from_error(&err);
        assert_eq!(resp.exit_code, Some(3));
        match resp.into_result() {
            Err(Error::Exited {
                exit_code,
                diagnostic,
            }) => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(diagnostic, "boom");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_exit_failure_displays_like_local_error() {
        let err = Error::Exited {
            exit_code: Some(3),
            diagnostic: String::new(),
        };
        let remote = Response::from_error(&err).into_result().unwrap_err();
        assert_eq!(remote.to_string(), err.to_string());
        assert!(matches!(
            remote,
            Error::Exited {
                exit_code: Some(3),
                ..
            }
        ));
    }

    #[test]
    fn test_signal_failure_survives_the_wire() {
        let err = Error::Exited {
            exit_code: None,
            diagnostic: "killed".to_string(),
        };
        let json = serde_json::to_string(&Response::from_error(&err)).unwrap();
        let resp: Response = serde_json::from_str(&json).unwrap();
        match resp.into_result() {
            Err(Error::Exited {
                exit_code,
                diagnostic,
            }) => {
                assert_eq!(exit_code, None);
                assert_eq!(diagnostic, "killed");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_other_errors_are_protocol_errors() {
        let resp = Response::from_error(&Error::invalid_input("prompt must not be empty"));
        assert!(!resp.exited);
        match resp.into_result() {
            Err(Error::Protocol { message }) => {
                assert_eq!(message, "invalid input: prompt must not be empty")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_response_success() {
        let resp = Response::success(Reply::text("ok"));
        assert_eq!(resp.into_result().unwrap().text, "ok");
    }

    #[test]
    fn test_message_serialization() {
        let msg = Message::Request(Request::Generate {
            user_id: "bob".to_string(),
            prompt: "hello".to_string(),
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"request\""));
        assert!(json.contains("\"op\":\"generate\""));
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, Message::Request(Request::Generate { .. })));
    }

    #[tokio::test]
    async fn test_framing_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        framing::write_message(&mut a, &Message::Status).await.unwrap();
        let msg: Message = framing::read_message(&mut b).await.unwrap();
        assert!(matches!(msg, Message::Status));
    }
}
