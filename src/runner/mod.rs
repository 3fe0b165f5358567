use log::{ info, warn };
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::time::Duration;

use crate::backend::{ extract_error_detail, ApiClient };

pub const NO_OUTPUT: &str = "(No output)";
pub const EXECUTION_FAILED: &str = "Failed to execute code";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionResult {
    Output(String),
    Error(String),
}

impl ExecutionResult {
    pub fn is_error(&self) -> bool {
        matches!(self, ExecutionResult::Error(_))
    }

    pub fn text(&self) -> &str {
        match self {
            ExecutionResult::Output(text) | ExecutionResult::Error(text) => text,
        }
    }
}

#[derive(Deserialize, Debug)]
struct ExecuteResponse {
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    execution_time: Option<f64>,
}

/// Sends code to `POST /api/execute-code`. Never retries, since the code may
/// have side effects. Callers are expected to keep one call in flight and
/// can check `is_busy` to disable their trigger.
pub struct CodeRunner {
    api: ApiClient,
    timeout: Option<Duration>,
    busy: AtomicBool,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl CodeRunner {
    pub fn new(api: ApiClient, timeout: Option<Duration>) -> Self {
        Self {
            api,
            timeout,
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub async fn execute(&self, code: &str) -> ExecutionResult {
        self.busy.store(true, Ordering::SeqCst);
        let _guard = BusyGuard(&self.busy);

        let url = match self.api.endpoint(&["api", "execute-code"]) {
            Ok(url) => url,
            Err(e) => {
                return ExecutionResult::Error(format!("{}: {}", EXECUTION_FAILED, e));
            }
        };
        let mut request = self.api.http().post(url).json(&json!({ "code": code }));
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Code execution request failed: {}", e);
                return ExecutionResult::Error(format!("{}: {}", EXECUTION_FAILED, e));
            }
        };

        let status = resp.status();
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Code execution response unreadable: {}", e);
                return ExecutionResult::Error(format!("{}: {}", EXECUTION_FAILED, e));
            }
        };

        if !status.is_success() {
            return ExecutionResult::Error(extract_error_detail(status.as_u16(), &body));
        }

        let parsed: ExecuteResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Code execution response is not valid JSON: {}", e);
                return ExecutionResult::Error(format!("{}: {}", EXECUTION_FAILED, e));
            }
        };
        if let Some(seconds) = parsed.execution_time {
            info!("Code executed in {:.3}s", seconds);
        }
        match parsed.error.filter(|e| !e.is_empty()) {
            Some(error) => ExecutionResult::Error(error),
            None => {
                let output = parsed.output.filter(|o| !o.is_empty()).unwrap_or_else(|| NO_OUTPUT.to_string());
                ExecutionResult::Output(output)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wiremock::matchers::{ body_json, method, path };
    use wiremock::{ Mock, MockServer, ResponseTemplate };

    async fn runner_with(response: ResponseTemplate) -> (CodeRunner, MockServer) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/execute-code"))
            .respond_with(response)
            .mount(&server).await;
        (CodeRunner::new(ApiClient::new(&server.uri()).unwrap(), None), server)
    }

    #[tokio::test]
    async fn output_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/execute-code"))
            .and(body_json(json!({ "code": "print(2 + 2)" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(
                    json!({ "success": true, "output": "4\n", "error": "", "execution_time": 0.01 })
                )
            )
            .mount(&server).await;

        let runner = CodeRunner::new(ApiClient::new(&server.uri()).unwrap(), None);
        assert_eq!(runner.execute("print(2 + 2)").await, ExecutionResult::Output("4\n".into()));
        assert!(!runner.is_busy());
    }

    #[tokio::test]
    async fn empty_output_is_marked() {
        let (runner, _server) = runner_with(
            ResponseTemplate::new(200).set_body_json(json!({ "success": true, "output": "" }))
        ).await;
        assert_eq!(runner.execute("x = 1").await, ExecutionResult::Output(NO_OUTPUT.into()));
    }

    #[tokio::test]
    async fn unreadable_success_body_is_a_failure() {
        let (runner, _server) = runner_with(
            ResponseTemplate::new(200).set_body_string("<html>proxy error page</html>")
        ).await;
        let result = runner.execute("print(1)").await;
        assert!(result.is_error());
        assert!(result.text().starts_with(EXECUTION_FAILED));
        assert!(!runner.is_busy());
    }

    #[tokio::test]
    async fn execution_error_is_surfaced_verbatim() {
        let (runner, _server) = runner_with(
            ResponseTemplate::new(200).set_body_json(
                json!({ "success": false, "output": "", "error": "NameError: name 'y' is not defined" })
            )
        ).await;
        assert_eq!(
            runner.execute("y").await,
            ExecutionResult::Error("NameError: name 'y' is not defined".into())
        );
    }

    #[tokio::test]
    async fn rejected_request_uses_server_message() {
        let (runner, _server) = runner_with(
            ResponseTemplate::new(400).set_body_json(json!({ "error": "No code provided" }))
        ).await;
        assert_eq!(runner.execute("").await, ExecutionResult::Error("No code provided".into()));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_generic_failure() {
        let runner = CodeRunner::new(ApiClient::new("http://127.0.0.1:9").unwrap(), None);
        let result = runner.execute("print(1)").await;
        assert!(result.is_error());
        assert!(result.text().starts_with(EXECUTION_FAILED));
        assert!(!runner.is_busy());
    }

    #[tokio::test]
    async fn configured_timeout_applies() {
        let (runner, _server) = runner_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "output": "late" }))
                .set_delay(Duration::from_secs(5))
        ).await;
        let runner = CodeRunner { timeout: Some(Duration::from_millis(100)), ..runner };
        let result = runner.execute("import time; time.sleep(10)").await;
        assert!(result.text().starts_with(EXECUTION_FAILED));
    }

    #[tokio::test]
    async fn busy_while_in_flight() {
        let (runner, _server) = runner_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "output": "done" }))
                .set_delay(Duration::from_millis(300))
        ).await;
        let runner = Arc::new(runner);
        let task = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.execute("1").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(runner.is_busy());
        assert_eq!(task.await.unwrap(), ExecutionResult::Output("done".into()));
        assert!(!runner.is_busy());
    }
}
