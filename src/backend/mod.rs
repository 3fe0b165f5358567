use log::debug;
use reqwest::header::{ HeaderMap, HeaderValue, CACHE_CONTROL, EXPIRES, PRAGMA };
use reqwest::{ Client as HttpClient, Response };
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use url::Url;

use crate::config::ConfigError;
use crate::error::{ SyncError, SyncResult };

/// Shared HTTP transport for every backend call. Each request carries
/// headers that forbid intermediaries from answering with a cached copy.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: HttpClient,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let mut base_url = Url::parse(base_url.trim()).map_err(|e|
            ConfigError::InvalidUrl(format!("{}: {}", base_url, e))
        )?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidUrl(format!("{} cannot be used as a base URL", base_url)));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = HttpClient::builder()
            .default_headers(no_cache_headers())
            .build()
            .map_err(|e| ConfigError::Http(e.to_string()))?;

        Ok(Self { http, base_url })
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves path segments against the base URL. Segments are
    /// percent-encoded, so ids may contain any character.
    pub fn endpoint(&self, segments: &[&str]) -> SyncResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::Transport(format!("invalid base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> SyncResult<T> {
        let url = self.endpoint(segments)?;
        debug!("GET {}", url);
        let resp = ensure_success(self.http.get(url).send().await?).await?;
        read_json(resp).await
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &JsonValue
    ) -> SyncResult<T> {
        let url = self.endpoint(segments)?;
        debug!("POST {}", url);
        let resp = ensure_success(self.http.post(url).json(body).send().await?).await?;
        read_json(resp).await
    }
}

fn no_cache_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store, must-revalidate"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
    headers
}

/// Turns a non-2xx response into `ServerRejected` carrying the server's own
/// explanation.
pub async fn ensure_success(resp: Response) -> SyncResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SyncError::ServerRejected {
        status: status.as_u16(),
        message: extract_error_detail(status.as_u16(), &body),
    })
}

pub async fn read_json<T: DeserializeOwned>(resp: Response) -> SyncResult<T> {
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| SyncError::Malformed(e.to_string()))
}

/// `message`, then `error`, then `detail` of a JSON body; otherwise the raw
/// text; otherwise a status line.
pub fn extract_error_detail(status: u16, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<JsonValue>(body) {
        for key in ["message", "error", "detail"] {
            match json.get(key) {
                Some(JsonValue::String(s)) if !s.trim().is_empty() => {
                    return s.clone();
                }
                Some(JsonValue::Null) | Some(JsonValue::String(_)) | None => {}
                Some(other) => {
                    return other.to_string();
                }
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("Server error: {}", status)
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{ method, path };
    use wiremock::{ Mock, MockServer, ResponseTemplate };

    #[test]
    fn error_detail_prefers_message_then_error_then_detail() {
        assert_eq!(extract_error_detail(500, r#"{"message":"m","error":"e","detail":"d"}"#), "m");
        assert_eq!(extract_error_detail(500, r#"{"error":"e","detail":"d"}"#), "e");
        assert_eq!(extract_error_detail(422, r#"{"detail":"Error processing document: bad pdf"}"#), "Error processing document: bad pdf");
    }

    #[test]
    fn error_detail_falls_back_to_text_then_status() {
        assert_eq!(extract_error_detail(502, "Bad Gateway\n"), "Bad Gateway");
        assert_eq!(extract_error_detail(503, ""), "Server error: 503");
        assert_eq!(extract_error_detail(500, r#"{"unrelated":true}"#), r#"{"unrelated":true}"#);
    }

    #[test]
    fn structured_detail_is_rendered_as_json() {
        let detail = extract_error_detail(422, r#"{"detail":[{"loc":["body","message"]}]}"#);
        assert!(detail.contains("loc"));
    }

    #[test]
    fn endpoints_encode_segments_and_keep_base_path() {
        let client = ApiClient::new("http://localhost:8000/api").unwrap();
        let url = client.endpoint(&["db", "get-chat", "a b/c"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/db/get-chat/a%20b%2Fc");

        let root = ApiClient::new("http://localhost:8000").unwrap();
        assert_eq!(root.endpoint(&["settings"]).unwrap().as_str(), "http://localhost:8000/settings");
    }

    #[test]
    fn invalid_base_url_is_a_config_error() {
        assert!(matches!(ApiClient::new("not a url"), Err(ConfigError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn every_request_carries_no_cache_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/settings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "theme_selector": "dark" })))
            .expect(1)
            .mount(&server).await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let body: JsonValue = client.get_json(&["settings"]).await.unwrap();
        assert_eq!(body["theme_selector"], "dark");

        let requests = server.received_requests().await.unwrap();
        let headers = &requests[0].headers;
        let value = |name: &str| headers.get(name).unwrap().to_str().unwrap().to_string();
        assert_eq!(value("cache-control"), "no-cache, no-store, must-revalidate");
        assert_eq!(value("pragma"), "no-cache");
        assert_eq!(value("expires"), "0");
    }

    #[tokio::test]
    async fn rejected_request_surfaces_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/db/save-chat"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "error": "disk full" })))
            .mount(&server).await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let err = client.post_json::<JsonValue>(&["db", "save-chat"], &json!({})).await.unwrap_err();
        assert_eq!(err, SyncError::ServerRejected { status: 500, message: "disk full".into() });
    }
}
