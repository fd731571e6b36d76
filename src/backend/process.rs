//! External process backend.
//!
//! Every call spawns the configured engine once with the request's positional
//! arguments, collects its output, and resolves when the process has exited
//! and both streams are drained. A semaphore bounds how many engines run at
//! once; callers beyond the limit wait their turn.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::StyleBackend;
use crate::config::ExitPolicy;
use crate::error::{Error, Result};
use crate::protocol::{Reply, Request};

/// Everything needed to launch the engine.
#[derive(Debug, Clone)]
pub struct InvokerSettings {
    pub program: String,
    pub entry: Option<PathBuf>,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub max_concurrency: usize,
    pub timeout: Option<Duration>,
    pub exit_policy: ExitPolicy,
}

impl InvokerSettings {
    /// Settings for a bare program with no entry point and default limits.
    pub fn program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            entry: None,
            args: Vec::new(),
            working_dir: None,
            max_concurrency: 4,
            timeout: None,
            exit_policy: ExitPolicy::Strict,
        }
    }
}

/// Spawns the engine and collects what it prints.
pub struct ProcessInvoker {
    settings: InvokerSettings,
    permits: Arc<Semaphore>,
}

impl ProcessInvoker {
    pub fn new(settings: InvokerSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrency.max(1)));
        Self { settings, permits }
    }

    pub fn program(&self) -> &str {
        &self.settings.program
    }

    /// Run the engine once with `args` appended to the fixed command line.
    pub async fn invoke(&self, args: &[String]) -> Result<Reply> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::Protocol {
                message: "worker pool closed".to_string(),
            })?;

        let mut command = self.command(args);
        debug!(
            "Spawning {} ({} args, subcommand {:?})",
            self.settings.program,
            args.len(),
            args.first()
        );

        let mut child = command.spawn().map_err(|source| Error::Launch {
            program: self.settings.program.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            let (out, err) = tokio::try_join!(collect_stdout(stdout), forward_stderr(stderr))?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((out, err, status))
        };

        let (out, err, status) = match self.settings.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(
                        "{} did not finish within {:?}, killing it",
                        self.settings.program, limit
                    );
                    // The child is killed when dropped.
                    return Err(Error::Timeout { limit });
                }
            },
            None => run.await?,
        };

        let reply = Reply::from_output(&out, &err, status.code());
        debug!(
            "{} exited with {:?} ({} bytes of output)",
            self.settings.program,
            reply.exit_code,
            out.len()
        );

        self.apply_exit_policy(status.success(), reply)
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.settings.program);
        if let Some(entry) = &self.settings.entry {
            command.arg(entry);
        }
        command
            .args(&self.settings.args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.settings.working_dir {
            command.current_dir(dir);
        }
        command
    }

    fn apply_exit_policy(&self, success: bool, reply: Reply) -> Result<Reply> {
        match self.settings.exit_policy {
            ExitPolicy::Strict if !success => Err(Error::Exited {
                exit_code: reply.exit_code,
                diagnostic: reply.diagnostic,
            }),
            _ => Ok(reply),
        }
    }
}

/// Read stdout to the end, in arrival order.
async fn collect_stdout<R>(stream: Option<R>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Log each stderr line as it arrives and keep a copy for the reply.
async fn forward_stderr<R>(stream: Option<R>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Vec::new();
    let Some(stream) = stream else {
        return Ok(captured);
    };

    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end();
        if !text.is_empty() {
            warn!(target: "stylemail::external", "{}", text);
        }
        captured.extend_from_slice(&line);
    }
    Ok(captured)
}

/// Backend that hands every call to the external engine.
pub struct ProcessBackend {
    invoker: ProcessInvoker,
}

impl ProcessBackend {
    pub fn new(invoker: ProcessInvoker) -> Self {
        Self { invoker }
    }

    async fn call(&self, request: Request) -> Result<Reply> {
        self.invoker.invoke(&request.args()).await
    }
}

#[async_trait]
impl StyleBackend for ProcessBackend {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn seed(&self, user_id: &str, samples: &[String]) -> Result<Reply> {
        self.call(Request::Seed {
            user_id: user_id.to_string(),
            samples: samples.to_vec(),
        })
        .await
    }

    async fn generate(&self, user_id: &str, prompt: &str) -> Result<Reply> {
        self.call(Request::Generate {
            user_id: user_id.to_string(),
            prompt: prompt.to_string(),
        })
        .await
    }

    async fn summarize_nudges(
        &self,
        user_id: &str,
        prompt: &str,
        nudges: &[String],
    ) -> Result<Reply> {
        self.call(Request::NudgeSummary {
            user_id: user_id.to_string(),
            prompt: prompt.to_string(),
            nudges: nudges.to_vec(),
        })
        .await
    }

    async fn draft_nudge_email(
        &self,
        user_id: &str,
        prompt: &str,
        nudges: &[String],
    ) -> Result<Reply> {
        self.call(Request::NudgeEmail {
            user_id: user_id.to_string(),
            prompt: prompt.to_string(),
            nudges: nudges.to_vec(),
        })
        .await
    }

    /// The engine has no ping; check that the program and entry point exist.
    async fn health_check(&self) -> Result<()> {
        if let Some(entry) = &self.invoker.settings.entry {
            if tokio::fs::metadata(entry).await.is_err() {
                return Err(Error::Launch {
                    program: self.invoker.program().to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("entry point not found: {}", entry.display()),
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    /// A `sh -c` stub; `$@` holds the request arguments.
    fn stub(script: &str) -> InvokerSettings {
        let mut settings = InvokerSettings::program("sh");
        settings.args = vec!["-c".to_string(), script.to_string(), "stub".to_string()];
        settings
    }

    fn backend(settings: InvokerSettings) -> ProcessBackend {
        ProcessBackend::new(ProcessInvoker::new(settings))
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    const ECHO_ARGS: &str = r#"printf '%s\n' "$@""#;

    #[tokio::test]
    async fn test_seed_passes_args_in_order() {
        let backend = backend(stub(ECHO_ARGS));
        let reply = backend
            .seed(
                "alice",
                &strings(&["Hi there, best regards", "Thanks, talk soon"]),
            )
            .await
            .unwrap();
        assert_eq!(
            reply.text,
            "seed\nalice\nHi there, best regards\nThanks, talk soon"
        );
        assert_eq!(reply.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_seed_with_no_samples_still_runs() {
        let backend = backend(stub(ECHO_ARGS));
        let reply = backend.seed("alice", &[]).await.unwrap();
        assert_eq!(reply.text, "seed\nalice");
    }

    #[tokio::test]
    async fn test_seed_reports_ok() {
        let script = r#"[ "$1" = seed ] && [ "$2" = alice ] && [ "$#" -eq 4 ] && echo ok"#;
        let backend = backend(stub(script));
        let reply = backend
            .seed(
                "alice",
                &strings(&["Hi there, best regards", "Thanks, talk soon"]),
            )
            .await
            .unwrap();
        assert_eq!(reply.text, "ok");
    }

    #[tokio::test]
    async fn test_generate_trims_output() {
        let script = r#"[ "$1" = generate ] && [ "$2" = bob ] && [ "$3" = "write a follow-up" ] && printf '\nDear team,\n...\n'"#;
        let backend = backend(stub(script));
        let reply = backend.generate("bob", "write a follow-up").await.unwrap();
        assert_eq!(reply.text, "Dear team,\n...");
    }

    #[tokio::test]
    async fn test_nudge_email_args() {
        let backend = backend(stub(ECHO_ARGS));
        let reply = backend
            .draft_nudge_email("carol", "be brief", &strings(&["1:1 overdue"]))
            .await
            .unwrap();
        assert_eq!(reply.text, "nudge-email\ncarol\nbe brief\n1:1 overdue");
    }

    #[tokio::test]
    async fn test_entry_point_comes_first() {
        let mut settings = stub(ECHO_ARGS);
        settings.args.push("--engine-flag".to_string());
        let backend = backend(settings);
        let reply = backend.generate("bob", "hi").await.unwrap();
        assert_eq!(reply.text, "--engine-flag\ngenerate\nbob\nhi");
    }

    #[tokio::test]
    async fn test_strict_policy_rejects_nonzero_exit() {
        let backend = backend(stub("echo partial; echo boom >&2; exit 3"));
        let err = backend.generate("bob", "hi").await.unwrap_err();
        match err {
            Error::Exited {
                exit_code,
                diagnostic,
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(diagnostic, "boom");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_permissive_policy_keeps_exit_code() {
        let mut settings = stub("echo partial; echo boom >&2; exit 3");
        settings.exit_policy = ExitPolicy::Permissive;
        let reply = backend(settings).generate("bob", "hi").await.unwrap();
        assert_eq!(reply.text, "partial");
        assert_eq!(reply.exit_code, Some(3));
        assert_eq!(reply.diagnostic, "boom");
    }

    #[tokio::test]
    async fn test_stderr_only_is_empty_but_visible() {
        let backend = backend(stub("echo 'model missing' >&2"));
        let reply = backend.generate("bob", "hi").await.unwrap();
        assert_eq!(reply.text, "");
        assert_eq!(reply.diagnostic, "model missing");
        assert_eq!(reply.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_signal_termination_is_failure() {
        let backend = backend(stub("kill -9 $$"));
        let err = backend.generate("bob", "hi").await.unwrap_err();
        assert!(matches!(err, Error::Exited { exit_code: None, .. }));
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let backend = backend(InvokerSettings::program("/nonexistent/stylemail-engine"));
        let err = backend.generate("bob", "hi").await.unwrap_err();
        assert!(matches!(err, Error::Launch { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_slow_engine() {
        let mut settings = stub("sleep 5");
        settings.timeout = Some(Duration::from_millis(100));
        let started = Instant::now();
        let err = backend(settings).generate("bob", "hi").await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(4));
        match err {
            Error::Timeout { limit } => assert_eq!(limit, Duration::from_millis(100)),
            other => panic!("unexpected: {:?}", other),
        }

    }

    #[tokio::test]
    async fn test_concurrent_calls_do_not_cross_talk() {
        let backend = Arc::new(backend(stub(r#"sleep 0.05; printf 'reply for %s' "$2""#)));
        let users: Vec<String> = (0..8).map(|i| format!("user-{}", i)).collect();

        let calls = users.iter().map(|user| {
            let backend = Arc::clone(&backend);
            let user = user.clone();
            async move { backend.generate(&user, "hi").await }
        });
        let replies = futures::future::join_all(calls).await;

        for (user, reply) in users.iter().zip(replies) {
            assert_eq!(reply.unwrap().text, format!("reply for {}", user));
        }
    }

    #[tokio::test]
    async fn test_pool_limits_concurrency() {
        // Each run holds a lock directory; a second concurrent run would fail mkdir.
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("lock");
        let script = format!(
            "mkdir '{0}' || exit 9; sleep 0.05; rmdir '{0}'; echo done",
            lock.display()
        );
        let mut settings = stub(&script);
        settings.max_concurrency = 1;
        let backend = Arc::new(backend(settings));

        let calls = (0..4).map(|i| {
            let backend = Arc::clone(&backend);
            async move { backend.generate(&format!("user-{}", i), "hi").await }
        });
        for reply in futures::future::join_all(calls).await {
            assert_eq!(reply.unwrap().text, "done");
        }
    }

    #[tokio::test]
    async fn test_health_check_missing_entry() {
        let mut settings = InvokerSettings::program("python3");
        settings.entry = Some(PathBuf::from("/nonexistent/engine/cli.py"));
        assert!(backend(settings).health_check().await.is_err());
    }
}
