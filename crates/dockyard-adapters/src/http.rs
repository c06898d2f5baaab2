use async_trait::async_trait;
use dockyard_core::{CancellationToken, CoreError, SuiteTest, TestContext, TestFailure};
use dockyard_schema::{parse_duration, TestSpec};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const METHODS: &[&str] = &["GET", "HEAD", "DELETE", "POST", "PUT", "PATCH"];

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct HttpFields {
    #[serde(default = "default_method")]
    method: String,
    #[serde(default = "default_path")]
    path: String,
    #[serde(default = "default_status")]
    expect_status: u16,
    #[serde(default)]
    body: Option<String>,
    /// Substring the response body must contain.
    #[serde(default)]
    expect_body: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    timeout: Option<String>,
}

fn default_method() -> String {
    "GET".to_owned()
}

fn default_path() -> String {
    "/".to_owned()
}

fn default_status() -> u16 {
    200
}

/// Sends one request to the target's `url` and checks the response status.
pub struct HttpTest {
    name: String,
    fields: HttpFields,
    timeout: Duration,
    target: Option<(String, String)>,
}

impl HttpTest {
    pub fn from_spec(spec: &TestSpec) -> Result<Self, CoreError> {
        let mut fields: HttpFields = spec.decode()?;
        fields.method = fields.method.to_ascii_uppercase();
        if !METHODS.contains(&fields.method.as_str()) {
            return Err(CoreError::Config(format!(
                "test '{}': unsupported HTTP method '{}'",
                spec.name, fields.method
            )));
        }
        if fields.body.is_some() && !matches!(fields.method.as_str(), "POST" | "PUT" | "PATCH") {
            return Err(CoreError::Config(format!(
                "test '{}': {} requests cannot carry a body",
                spec.name, fields.method
            )));
        }
        if !fields.path.starts_with('/') {
            fields.path.insert(0, '/');
        }
        let timeout = fields
            .timeout
            .as_deref()
            .map(parse_duration)
            .transpose()?
            .unwrap_or(DEFAULT_TIMEOUT);
        Ok(Self {
            name: spec.name.clone(),
            fields,
            timeout,
            target: None,
        })
    }

    pub fn url(&self) -> Option<&str> {
        self.target.as_ref().map(|(_, url)| url.as_str())
    }
}

struct Response {
    status: u16,
    body: String,
}

fn send(
    method: &str,
    url: &str,
    headers: &BTreeMap<String, String>,
    body: Option<&str>,
    timeout: Duration,
) -> Result<Response, String> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(timeout))
        .build()
        .into();

    let result = match method {
        "POST" | "PUT" | "PATCH" => {
            let mut req = match method {
                "POST" => agent.post(url),
                "PUT" => agent.put(url),
                _ => agent.patch(url),
            };
            for (k, v) in headers {
                req = req.header(k.as_str(), v.as_str());
            }
            req.send(body.unwrap_or_default())
        }
        _ => {
            let mut req = match method {
                "HEAD" => agent.head(url),
                "DELETE" => agent.delete(url),
                _ => agent.get(url),
            };
            for (k, v) in headers {
                req = req.header(k.as_str(), v.as_str());
            }
            req.call()
        }
    };

    let resp = result.map_err(|e| e.to_string())?;
    let status = resp.status().as_u16();
    let body = if method == "HEAD" {
        String::new()
    } else {
        resp.into_body().read_to_string().map_err(|e| e.to_string())?
    };
    Ok(Response { status, body })
}

#[async_trait]
impl SuiteTest for HttpTest {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        "http"
    }

    fn initialize(&mut self, ctx: &TestContext<'_>) -> Result<(), CoreError> {
        let base = ctx.target.get("url")?;
        let url = format!("{}{}", base.trim_end_matches('/'), self.fields.path);
        self.target = Some((ctx.target.name().to_owned(), url));
        Ok(())
    }

    async fn run(&mut self, _cancel: &CancellationToken) -> Result<(), TestFailure> {
        let Some((target, url)) = self.target.clone() else {
            return Err(TestFailure::new("test was not initialized with a target"));
        };
        let method = self.fields.method.clone();
        debug!(test = %self.name, %method, %url, "sending request");

        let (m, u, headers, body, timeout) = (
            method.clone(),
            url.clone(),
            self.fields.headers.clone(),
            self.fields.body.clone(),
            self.timeout,
        );
        let resp = tokio::task::spawn_blocking(move || send(&m, &u, &headers, body.as_deref(), timeout))
            .await
            .map_err(|e| TestFailure::new(format!("request task failed: {e}")))?
            .map_err(|e| TestFailure::new(format!("{target}: {method} {url} failed: {e}")))?;

        if resp.status != self.fields.expect_status {
            return Err(TestFailure::new(format!(
                "{target}: {method} {url}: expected status {}, got {}",
                self.fields.expect_status, resp.status
            )));
        }
        if let Some(needle) = &self.fields.expect_body {
            if !resp.body.contains(needle.as_str()) {
                return Err(TestFailure::new(format!(
                    "{target}: {method} {url}: response body does not contain {needle:?}"
                )));
            }
        }
        Ok(())
    }
}
