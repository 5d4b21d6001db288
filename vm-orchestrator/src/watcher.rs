//! Routes the output of long-running Vagrant commands to remote callbacks.

use crate::callback::{Callback, CallbackSink};
use crate::error::{AggregatedError, HandlerError, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use vm_provider::{CommandOutput, CommandStream};

const ERROR_MARKER: &str = "error:";

/// Callbacks a streaming request must carry.
#[derive(Debug, Clone)]
pub struct WatchCallbacks {
    pub success: Callback,
    pub failure: Callback,
    pub output: Option<Callback>,
}

#[derive(Debug, Deserialize)]
struct RawCallbacks {
    #[serde(default, alias = "onSuccess")]
    success: Option<Callback>,
    #[serde(default, alias = "onFailure")]
    failure: Option<Callback>,
    #[serde(default, alias = "onOutput")]
    output: Option<Callback>,
}

impl WatchCallbacks {
    pub fn from_args(args: &Value) -> Result<Self> {
        if args.is_null() {
            return Err(HandlerError::InvalidArgument(
                "arguments are not passed".to_string(),
            ));
        }

        let raw: RawCallbacks = serde_json::from_value(args.clone())
            .map_err(|e| HandlerError::InvalidArgument(e.to_string()))?;

        let success = raw.success.filter(Callback::is_valid).ok_or_else(|| {
            HandlerError::InvalidArgument("invalid request: missing success callback".to_string())
        })?;
        let failure = raw.failure.filter(Callback::is_valid).ok_or_else(|| {
            HandlerError::InvalidArgument("invalid request: missing failure callback".to_string())
        })?;

        Ok(Self {
            success,
            failure,
            output: raw.output.filter(Callback::is_valid),
        })
    }
}

/// Outcome of a watched command, available once its callback has fired.
pub type WatchOutcome = std::result::Result<(), AggregatedError>;

#[derive(Clone)]
pub struct CommandWatcher {
    sink: Arc<dyn CallbackSink>,
}

impl CommandWatcher {
    pub fn new(sink: Arc<dyn CallbackSink>) -> Self {
        Self { sink }
    }

    /// Starts a command and follows its output in the background.
    ///
    /// A command that cannot be started is reported here and no callback
    /// fires. Otherwise exactly one of `success`/`failure` is invoked, once,
    /// when the output stream ends; the returned handle resolves after that.
    pub fn watch<F>(
        &self,
        method: &str,
        path: &Path,
        callbacks: WatchCallbacks,
        start: F,
    ) -> Result<JoinHandle<WatchOutcome>>
    where
        F: FnOnce() -> vm_provider::Result<CommandStream>,
    {
        let stream = start().map_err(|source| HandlerError::Execution {
            method: method.to_string(),
            source,
        })?;

        let sink = Arc::clone(&self.sink);
        let method = method.to_string();
        let path = path.display().to_string();

        Ok(tokio::spawn(async move {
            debug!("vagrant: waiting for output from {:?}...", method);
            let outcome = follow(sink.as_ref(), &method, &callbacks, stream).await;

            match &outcome {
                Ok(()) => {
                    info!("{:?} success for {:?}", method, path);
                    sink.invoke(&callbacks.success, Vec::new()).await;
                }
                Err(err) => {
                    error!("{:?} error for {:?}: {}", method, path, err);
                    sink.invoke(&callbacks.failure, vec![json!(err.to_string())])
                        .await;
                }
            }

            outcome
        }))
    }
}

async fn follow(
    sink: &dyn CallbackSink,
    method: &str,
    callbacks: &WatchCallbacks,
    mut stream: CommandStream,
) -> WatchOutcome {
    let mut errors = AggregatedError::new();

    while let Some(output) = stream.recv().await {
        match output {
            CommandOutput::Line(line) => {
                if let Some(cause) = error_cause(&line) {
                    errors.push(cause);
                }
                if let Some(output) = &callbacks.output {
                    debug!("{}: {}", method, line);
                    sink.invoke(output, vec![json!(line)]).await;
                }
            }
            CommandOutput::Error(err) => errors.push(err.to_string()),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Extracts the message following a case-insensitive `error:` marker,
/// with escaped newlines restored.
fn error_cause(line: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets aligned with `line`.
    let index = line.to_ascii_lowercase().find(ERROR_MARKER)?;
    let message = line[index + ERROR_MARKER.len()..].trim();

    if message.is_empty() {
        None
    } else {
        Some(message.replace("\\n", "\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{CallbackEvent, RecordingSink};
    use tokio::sync::mpsc;
    use vm_provider::ProviderError;

    fn callbacks(with_output: bool) -> WatchCallbacks {
        WatchCallbacks {
            success: Callback::new("success"),
            failure: Callback::new("failure"),
            output: with_output.then(|| Callback::new("output")),
        }
    }

    fn stream(events: Vec<CommandOutput>) -> CommandStream {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in events {
            tx.send(event).unwrap();
        }
        rx
    }

    async fn run(events: Vec<CommandOutput>, with_output: bool) -> (WatchOutcome, RecordingSink) {
        let sink = RecordingSink::new();
        let watcher = CommandWatcher::new(Arc::new(sink.clone()));

        let handle = watcher
            .watch("vagrant.up", Path::new("/vm/a"), callbacks(with_output), move || {
                Ok(stream(events))
            })
            .unwrap();

        (handle.await.unwrap(), sink)
    }

    #[test]
    fn test_error_cause() {
        assert_eq!(error_cause("Error: disk full").as_deref(), Some("disk full"));
        assert_eq!(
            error_cause("==> default: ERROR:   quota\\nexceeded  ").as_deref(),
            Some("quota\nexceeded")
        );
        assert_eq!(error_cause("error:   "), None);
        assert_eq!(error_cause("Booting VM..."), None);
    }

    #[test]
    fn test_callbacks_require_success_and_failure() {
        let err = WatchCallbacks::from_args(&json!({ "failure": "f" })).unwrap_err();
        assert!(err.to_string().contains("missing success callback"));

        let err = WatchCallbacks::from_args(&json!({ "success": "s" })).unwrap_err();
        assert!(err.to_string().contains("missing failure callback"));

        let callbacks =
            WatchCallbacks::from_args(&json!({ "onSuccess": "s", "onFailure": "f" })).unwrap();
        assert_eq!(callbacks.success.as_str(), "s");
        assert!(callbacks.output.is_none());
    }

    #[tokio::test]
    async fn test_clean_stream_fires_success_once() {
        let events = vec![
            CommandOutput::Line("Bringing machine 'default' up...".into()),
            CommandOutput::Line("Machine booted and ready!".into()),
        ];

        let (outcome, sink) = run(events, true).await;

        assert_eq!(outcome, Ok(()));
        assert_eq!(
            sink.events(),
            vec![
                CallbackEvent::new("output", vec![json!("Bringing machine 'default' up...")]),
                CallbackEvent::new("output", vec![json!("Machine booted and ready!")]),
                CallbackEvent::new("success", vec![]),
            ]
        );
    }

    #[tokio::test]
    async fn test_error_marker_fires_failure_with_cause() {
        let events = vec![
            CommandOutput::Line("Starting...".into()),
            CommandOutput::Line("Error: disk full".into()),
        ];

        let (outcome, sink) = run(events, false).await;

        assert_eq!(outcome.unwrap_err().causes(), ["disk full".to_string()]);
        assert_eq!(
            sink.events(),
            vec![CallbackEvent::new("failure", vec![json!("disk full")])]
        );
    }

    #[tokio::test]
    async fn test_terminal_stream_error_fires_failure() {
        let events = vec![
            CommandOutput::Line("Halting...".into()),
            CommandOutput::Error(ProviderError::CommandFailed("exit status 1".into())),
        ];

        let (outcome, sink) = run(events, false).await;

        assert!(outcome.is_err());
        assert_eq!(
            sink.events(),
            vec![CallbackEvent::new(
                "failure",
                vec![json!("Command failed: exit status 1")]
            )]
        );
    }

    #[tokio::test]
    async fn test_markers_and_terminal_error_are_aggregated() {
        let events = vec![
            CommandOutput::Line("error: first".into()),
            CommandOutput::Error(ProviderError::CommandFailed("exit status 1".into())),
        ];

        let (outcome, sink) = run(events, false).await;

        assert_eq!(outcome.unwrap_err().causes().len(), 2);
        assert_eq!(sink.count("failure"), 1);
        assert_eq!(sink.count("success"), 0);
    }

    #[tokio::test]
    async fn test_start_failure_is_synchronous_and_silent() {
        let sink = RecordingSink::new();
        let watcher = CommandWatcher::new(Arc::new(sink.clone()));

        let result = watcher.watch("vagrant.halt", Path::new("/vm/a"), callbacks(true), || {
            Err(ProviderError::NotFound("no Vagrantfile".into()))
        });

        assert!(matches!(result, Err(HandlerError::Execution { .. })));
        assert!(sink.events().is_empty());
    }
}
