//! Bot invocation: transport seam plus a retrying client.
//!
//! The bot is an external collaborator reached through [`BotTransport`], a
//! single blocking call that returns the raw transcript text. The shipped
//! transport ([`NodeBotProcess`]) shells out to the legacy Node driver
//! script; interpretation of the transcript is the caller's responsibility
//! (see [`crate::transcript`]).
//!
//! [`BotClient`] wraps any transport with the retry policy: up to
//! `max_retries` attempts, sleeping `2^attempt` seconds between attempts on
//! rate-limit or transient transport failures. Timeouts and non-success
//! exits surface immediately.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::BotCallError;
use crate::utils::backoff_delay;

/// Default hard timeout for one bot call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of attempts per question.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One blocking call to the external bot.
#[async_trait]
pub trait BotTransport: Send + Sync {
    /// Ask one question, optionally with a serialized conversation prefix,
    /// and return the raw transcript text unparsed.
    async fn invoke(
        &self,
        question: &str,
        context_json: Option<&str>,
    ) -> Result<String, BotCallError>;
}

/// Transport that runs the legacy Node bot driver as a subprocess.
///
/// The driver takes the question as its first argument and an optional
/// context JSON array as its second, and prints the display-format
/// transcript on stdout.
pub struct NodeBotProcess {
    script: PathBuf,
    timeout: Duration,
}

impl NodeBotProcess {
    pub fn new(script: PathBuf, timeout: Duration) -> Self {
        Self { script, timeout }
    }

    /// Path of the driver script.
    pub fn script(&self) -> &PathBuf {
        &self.script
    }
}

#[async_trait]
impl BotTransport for NodeBotProcess {
    async fn invoke(
        &self,
        question: &str,
        context_json: Option<&str>,
    ) -> Result<String, BotCallError> {
        let mut command = Command::new("node");
        command
            .arg(&self.script)
            .arg(question)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(context) = context_json {
            command.arg(context);
        }

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Err(_) => {
                return Err(BotCallError::Timeout {
                    seconds: self.timeout.as_secs(),
                })
            }
            Ok(Err(err)) => return Err(BotCallError::Transport(err.to_string())),
            Ok(Ok(output)) => output,
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(BotCallError::Status {
                code: output.status.code().unwrap_or(-1),
                detail: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

/// Retrying wrapper around a [`BotTransport`].
pub struct BotClient<T: BotTransport> {
    transport: T,
    max_retries: u32,
}

impl<T: BotTransport> BotClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Ask one question with retry.
    ///
    /// Transient failures (rate limit, transport) back off `2^attempt`
    /// seconds and retry up to `max_retries` attempts in total; the final
    /// failure reports the exhausted attempt count. Timeouts and
    /// non-success exit statuses are surfaced unchanged on first sight.
    pub async fn ask(
        &self,
        question: &str,
        context_json: Option<&str>,
    ) -> Result<String, BotCallError> {
        let mut last: Option<BotCallError> = None;

        for attempt in 0..self.max_retries {
            match self.transport.invoke(question, context_json).await {
                Ok(transcript) => return Ok(transcript),
                Err(err) if err.is_transient() => {
                    if attempt + 1 < self.max_retries {
                        let delay = backoff_delay(attempt);
                        tracing::warn!(
                            attempt = attempt + 1,
                            max_retries = self.max_retries,
                            delay_secs = delay.as_secs(),
                            error = %err,
                            "Transient bot failure, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(match last {
            Some(BotCallError::RateLimited(_)) => BotCallError::RateLimitExhausted {
                attempts: self.max_retries,
            },
            Some(err) => BotCallError::TransportExhausted {
                attempts: self.max_retries,
                last: err.to_string(),
            },
            None => BotCallError::TransportExhausted {
                attempts: self.max_retries,
                last: "no attempts were made".to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Transport whose first `failures` calls fail with the given error.
    struct FlakyTransport {
        calls: Arc<AtomicU32>,
        failures: u32,
        error: fn() -> BotCallError,
    }

    #[async_trait]
    impl BotTransport for FlakyTransport {
        async fn invoke(
            &self,
            _question: &str,
            _context_json: Option<&str>,
        ) -> Result<String, BotCallError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err((self.error)())
            } else {
                Ok("--- 分段 1 ---\n消息类型: answer\n".to_string())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhausts_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = BotClient::new(FlakyTransport {
            calls: calls.clone(),
            failures: u32::MAX,
            error: || BotCallError::RateLimited("busy".into()),
        });

        let err = client.ask("q", None).await.unwrap_err();
        assert!(matches!(
            err,
            BotCallError::RateLimitExhausted { attempts: 3 }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = BotClient::new(FlakyTransport {
            calls: calls.clone(),
            failures: 2,
            error: || BotCallError::Transport("connection refused".into()),
        });

        let transcript = client.ask("q", None).await.expect("third attempt wins");
        assert!(transcript.contains("分段"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_is_not_retried() {
        struct TimeoutTransport {
            calls: Arc<AtomicU32>,
        }

        #[async_trait]
        impl BotTransport for TimeoutTransport {
            async fn invoke(
                &self,
                _question: &str,
                _context_json: Option<&str>,
            ) -> Result<String, BotCallError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(BotCallError::Timeout { seconds: 60 })
            }
        }

        let calls = Arc::new(AtomicU32::new(0));
        let client = BotClient::new(TimeoutTransport {
            calls: calls.clone(),
        });

        let err = client.ask("q", None).await.unwrap_err();
        assert!(matches!(err, BotCallError::Timeout { seconds: 60 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_retried() {
        struct FailingTransport {
            calls: Arc<AtomicU32>,
        }

        #[async_trait]
        impl BotTransport for FailingTransport {
            async fn invoke(
                &self,
                _question: &str,
                _context_json: Option<&str>,
            ) -> Result<String, BotCallError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(BotCallError::Status {
                    code: 1,
                    detail: "script crashed".into(),
                })
            }
        }

        let calls = Arc::new(AtomicU32::new(0));
        let client = BotClient::new(FailingTransport {
            calls: calls.clone(),
        });

        let err = client.ask("q", None).await.unwrap_err();
        assert!(matches!(err, BotCallError::Status { code: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_node_script_is_transport_error() {
        let transport = NodeBotProcess::new(
            PathBuf::from("definitely-missing-driver.js"),
            Duration::from_secs(5),
        );
        // `node` resolves the missing script itself, so depending on the
        // environment this is either a spawn failure or a non-zero exit.
        let err = transport.invoke("hello", None).await.unwrap_err();
        assert!(matches!(
            err,
            BotCallError::Transport(_) | BotCallError::Status { .. }
        ));
    }
}
