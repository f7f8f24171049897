use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::payload::{ProductRecord, SessionSeed, TestCase};
use crate::recovery::RecoveryManager;

/// How an execution failed, if it did. This is the typed replacement for
/// exception-as-control-flow: the oracle and the driver branch on the kind
/// instead of catching ambiguously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No response within the configured bound. Non-fatal to the loop.
    Timeout,
    /// The underlying connection/session is no longer usable. Triggers
    /// recovery on session targets.
    Fatal,
    /// The target answered, but with an error status/code. Never triggers
    /// recovery.
    Application,
}

#[derive(Debug, Clone)]
pub struct ExecutionError {
    pub kind: ErrorKind,
    pub detail: String,
}

/// The outcome of executing one test case. Ephemeral: consumed by the oracle
/// and the state tracker, folded into a failure record or discarded.
#[derive(Debug)]
pub struct ExecutionResult<R> {
    pub response: Option<R>,
    /// Device log line, response-body excerpt, or a synthesized note when
    /// the transport failed; downstream state tracking always has a value
    /// to inspect.
    pub log_excerpt: String,
    pub elapsed: Duration,
    pub error: Option<ExecutionError>,
    pub raw_status: Option<u16>,
}

impl<R> ExecutionResult<R> {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Outcome of an adapter's attempt to restore itself after a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    Reconnected,
    GaveUp,
    /// The adapter has no session to repair (stateless targets).
    Unsupported,
}

/// Executes one test case against a concrete target.
///
/// Implementations must never propagate transport failures to the caller:
/// every failure kind is captured in the returned result's `error` field.
pub trait TargetAdapter<P>: Send {
    type Response;

    fn execute(&mut self, case: &TestCase<P>) -> ExecutionResult<Self::Response>;

    /// Attempts to restore a usable session after a fatal error. Stateless
    /// adapters have nothing to restore.
    fn recover(&mut self) -> Recovery {
        Recovery::Unsupported
    }
}

// ---------------------------------------------------------------------------
// Stateless HTTP adapter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Posts each test case as a JSON body to a fixed endpoint. A status >= 400
/// is an error outcome but still yields a populated result so the oracle can
/// see it; a timeout is a distinguished error kind, not a crash.
pub struct HttpAdapter {
    agent: ureq::Agent,
    url: String,
    headers: Vec<(String, String)>,
}

const EXCERPT_LIMIT: usize = 200;

impl HttpAdapter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        HttpAdapter {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            url: url.into(),
            headers: vec![(
                "Content-Type".to_string(),
                "application/json".to_string(),
            )],
        }
    }

    /// Adds a request header sent with every execution (session cookies,
    /// CSRF tokens and the like).
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn result_from_response(
        &self,
        response: ureq::Response,
        started: Instant,
    ) -> ExecutionResult<HttpResponse> {
        let status = response.status();
        let body = response.into_string().unwrap_or_default();
        let error = (status >= 400).then(|| ExecutionError {
            kind: ErrorKind::Application,
            detail: format!("status {status}"),
        });
        ExecutionResult {
            log_excerpt: simplify_body(status, &body),
            response: Some(HttpResponse { status, body }),
            elapsed: started.elapsed(),
            error,
            raw_status: Some(status),
        }
    }
}

/// Collapses noisy error bodies into a short, stable message: HTML error
/// pages carry no useful detail, and anything else is truncated.
pub(crate) fn simplify_body(status: u16, body: &str) -> String {
    if status >= 400 && body.to_lowercase().contains("<html") {
        if body.to_lowercase().contains("request body exceeded") {
            return "Memory error: request data too large".to_string();
        }
        return "Error response in HTML format - details omitted".to_string();
    }
    truncate_excerpt(body)
}

fn truncate_excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_LIMIT {
        text.to_string()
    } else {
        let mut excerpt: String = text.chars().take(EXCERPT_LIMIT).collect();
        excerpt.push_str("...");
        excerpt
    }
}

impl TargetAdapter<ProductRecord> for HttpAdapter {
    type Response = HttpResponse;

    fn execute(&mut self, case: &TestCase<ProductRecord>) -> ExecutionResult<HttpResponse> {
        let body = case.payload.body();
        let started = Instant::now();

        let mut request = self.agent.post(&self.url);
        for (name, value) in &self.headers {
            request = request.set(name, value);
        }

        match request.send_string(&body) {
            Ok(response) => self.result_from_response(response, started),
            // ureq surfaces >= 400 as an error; that is an application-level
            // outcome here, with the response preserved.
            Err(ureq::Error::Status(_, response)) => self.result_from_response(response, started),
            Err(ureq::Error::Transport(transport)) => {
                let detail = transport.to_string();
                let kind = if detail.contains("timed out") || detail.contains("timeout") {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::Fatal
                };
                ExecutionResult {
                    response: None,
                    log_excerpt: format!("[transport failure] {detail}"),
                    elapsed: started.elapsed(),
                    error: Some(ExecutionError { kind, detail }),
                    raw_status: None,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Session adapter
// ---------------------------------------------------------------------------

/// Failures at the session transport boundary.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("session transport failure: {0}")]
    Io(String),
    #[error("session transport is not connected")]
    NotConnected,
}

/// The opaque session client boundary: connect/disconnect lifecycle, one
/// command write returning the device response, and access to the most
/// recent device log line. Provided by external collaborators; the CLI ships
/// a simulator.
pub trait SessionTransport: Send {
    fn connect(&mut self, device: &str) -> Result<(), TransportError>;
    fn disconnect(&mut self) -> Result<(), TransportError>;
    fn write_command(&mut self, command: &[Value]) -> Result<Vec<u8>, TransportError>;
    fn last_log_line(&mut self) -> Option<String>;
}

/// Drives one stateful device session. `execute` writes a single command and
/// reads back the response plus the latest log line; transport failures are
/// captured as fatal errors with a synthesized log excerpt so downstream
/// state tracking still has a value to inspect.
pub struct SessionAdapter<T: SessionTransport> {
    transport: T,
    device: String,
    recovery: RecoveryManager,
}

impl<T: SessionTransport> SessionAdapter<T> {
    pub fn new(transport: T, device: impl Into<String>, recovery: RecoveryManager) -> Self {
        SessionAdapter {
            transport,
            device: device.into(),
            recovery,
        }
    }

    pub fn connect(&mut self) -> Result<(), TransportError> {
        self.transport.connect(&self.device)
    }

    /// Best-effort teardown for the campaign's finally-path.
    pub fn disconnect(&mut self) {
        if let Err(err) = self.transport.disconnect() {
            log::debug!("disconnect from {} failed: {err}", self.device);
        }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

impl<T: SessionTransport> TargetAdapter<SessionSeed> for SessionAdapter<T> {
    type Response = Vec<u8>;

    fn execute(&mut self, case: &TestCase<SessionSeed>) -> ExecutionResult<Vec<u8>> {
        let started = Instant::now();
        match self.transport.write_command(&case.payload.command) {
            Ok(response) => {
                let log_excerpt = self
                    .transport
                    .last_log_line()
                    .unwrap_or_else(|| "[no log output]".to_string());
                ExecutionResult {
                    response: Some(response),
                    log_excerpt,
                    elapsed: started.elapsed(),
                    error: None,
                    raw_status: None,
                }
            }
            Err(err) => ExecutionResult {
                response: None,
                log_excerpt: format!("[transport failure] {err}"),
                elapsed: started.elapsed(),
                error: Some(ExecutionError {
                    kind: ErrorKind::Fatal,
                    detail: err.to_string(),
                }),
                raw_status: None,
            },
        }
    }

    fn recover(&mut self) -> Recovery {
        self.recovery.run(&mut self.transport, &self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::StateMatch;
    use serde_json::json;

    /// Echoes every command back as bytes and logs a fixed line.
    struct EchoTransport {
        log_line: String,
        fail_next: bool,
    }

    impl SessionTransport for EchoTransport {
        fn connect(&mut self, _device: &str) -> Result<(), TransportError> {
            Ok(())
        }

        fn disconnect(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn write_command(&mut self, command: &[Value]) -> Result<Vec<u8>, TransportError> {
            if self.fail_next {
                return Err(TransportError::Io("connection reset".to_string()));
            }
            Ok(command
                .iter()
                .filter_map(|v| v.as_u64().map(|b| b as u8))
                .collect())
        }

        fn last_log_line(&mut self) -> Option<String> {
            Some(self.log_line.clone())
        }
    }

    fn case(command: Vec<Value>) -> TestCase<SessionSeed> {
        TestCase {
            payload: SessionSeed::new(StateMatch::Any, "Locked", command),
            operator: "bit_flip",
        }
    }

    #[test]
    fn session_execute_returns_response_and_log_line() {
        let transport = EchoTransport {
            log_line: "Lock mechanism closed".to_string(),
            fail_next: false,
        };
        let mut adapter = SessionAdapter::new(transport, "lock", RecoveryManager::default());
        let result = adapter.execute(&case(vec![json!(0), json!(1), json!(2)]));

        assert_eq!(result.response, Some(vec![0, 1, 2]));
        assert_eq!(result.log_excerpt, "Lock mechanism closed");
        assert!(result.error.is_none());
        assert!(result.raw_status.is_none());
    }

    #[test]
    fn session_transport_failure_is_captured_not_propagated() {
        let transport = EchoTransport {
            log_line: String::new(),
            fail_next: true,
        };
        let mut adapter = SessionAdapter::new(transport, "lock", RecoveryManager::default());
        let result = adapter.execute(&case(vec![json!(0)]));

        assert!(result.response.is_none());
        assert_eq!(result.error_kind(), Some(ErrorKind::Fatal));
        // Synthesized excerpt keeps state tracking supplied with input.
        assert!(result.log_excerpt.contains("transport failure"));
    }

    #[test]
    fn html_error_bodies_are_simplified() {
        assert_eq!(
            simplify_body(500, "<html><body>traceback ...</body></html>"),
            "Error response in HTML format - details omitted"
        );
        assert_eq!(
            simplify_body(400, "<HTML>Request body exceeded settings.DATA_UPLOAD_MAX</HTML>"),
            "Memory error: request data too large"
        );
    }

    #[test]
    fn plain_error_bodies_are_truncated() {
        let long_body = "e".repeat(500);
        let excerpt = simplify_body(500, &long_body);
        assert_eq!(excerpt.chars().count(), EXCERPT_LIMIT + 3);
        assert!(excerpt.ends_with("..."));

        assert_eq!(simplify_body(200, "ok"), "ok");
    }

    #[test]
    fn test_case_payload_serializes_to_wire_body() {
        let payload = crate::payload::ProductRecord::new("Widget", json!(10), "x");
        let body = payload.body();
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["name"], json!("Widget"));
        assert_eq!(parsed["price"], json!(10));
    }
}
