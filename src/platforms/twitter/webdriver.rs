//! Minimal W3C WebDriver client, just enough to drive a logged-in browser.
//!
//! Talks JSON over HTTP to chromedriver (or anything speaking the protocol).
//! Every response is `{"value": ...}`; failures carry `value.error` and
//! `value.message`.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, Method};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::platforms::PlatformError;

/// Key under which W3C element references are returned.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum WebDriverError {
    #[error("webdriver http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no such element: {0}")]
    NoSuchElement(String),
    #[error("webdriver error '{error}': {message}")]
    Protocol { error: String, message: String },
    #[error("unexpected webdriver response: {0}")]
    Decode(String),
    #[error("timed out after {}s waiting for {what}", .after.as_secs())]
    Timeout { what: String, after: Duration },
}

impl From<WebDriverError> for PlatformError {
    fn from(e: WebDriverError) -> Self {
        PlatformError::Browser(e.to_string())
    }
}

/// How to find an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator<'a> {
    Css(&'a str),
    XPath(&'a str),
}

impl Locator<'_> {
    fn to_json(self) -> Value {
        match self {
            Locator::Css(v) => json!({ "using": "css selector", "value": v }),
            Locator::XPath(v) => json!({ "using": "xpath", "value": v }),
        }
    }

    fn describe(self) -> String {
        match self {
            Locator::Css(v) => format!("css `{v}`"),
            Locator::XPath(v) => format!("xpath `{v}`"),
        }
    }
}

/// Opaque handle to an element in the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    id: String,
}

impl Element {
    /// Reference form used when passing the element as a script argument.
    pub fn to_arg(&self) -> Value {
        json!({ ELEMENT_KEY: self.id })
    }

    fn from_value(v: &Value) -> Result<Self, WebDriverError> {
        v.get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(|id| Element { id: id.to_string() })
            .ok_or_else(|| WebDriverError::Decode(format!("not an element reference: {v}")))
    }
}

/// Chrome switches that keep automation from standing out.
pub fn stealth_chrome_args(headless: bool) -> Vec<String> {
    let mut args: Vec<String> = [
        "--no-sandbox",
        "--disable-dev-shm-usage",
        "--disable-blink-features=AutomationControlled",
        "--disable-background-timer-throttling",
        "--disable-backgrounding-occluded-windows",
        "--disable-renderer-backgrounding",
        "--disable-gpu",
        "--window-size=1920,1080",
        "--disable-extensions",
        "--disable-popup-blocking",
        "--disable-notifications",
        "--lang=en-US",
        "--user-agent=Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    if headless {
        args.push("--headless=new".into());
    }
    args
}

/// An open browser session.
#[derive(Debug)]
pub struct WebDriver {
    http: Client,
    base: String,
    session_id: String,
}

impl WebDriver {
    /// Start a Chrome session on the WebDriver server at `server_url`.
    pub async fn connect(server_url: &str, chrome_args: &[String]) -> Result<Self, WebDriverError> {
        let http = Client::builder().timeout(Duration::from_secs(120)).build()?;
        let base = server_url.trim_end_matches('/').to_string();
        let caps = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": chrome_args,
                        "excludeSwitches": ["enable-automation"],
                    }
                }
            }
        });
        let value = send(&http, Method::POST, &format!("{base}/session"), Some(caps)).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| WebDriverError::Decode(format!("no sessionId in {value}")))?
            .to_string();
        debug!(session = %session_id, "webdriver session started");
        Ok(Self { http, base, session_id })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn cmd(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, WebDriverError> {
        let url = format!("{}/session/{}{path}", self.base, self.session_id);
        send(&self.http, method, &url, body).await
    }

    // ── navigation ────────────────────────────────────────────────────────────

    pub async fn navigate(&self, url: &str) -> Result<(), WebDriverError> {
        self.cmd(Method::POST, "/url", Some(json!({ "url": url }))).await?;
        Ok(())
    }

    pub async fn current_url(&self) -> Result<String, WebDriverError> {
        as_string(self.cmd(Method::GET, "/url", None).await?)
    }

    pub async fn page_source(&self) -> Result<String, WebDriverError> {
        as_string(self.cmd(Method::GET, "/source", None).await?)
    }

    /// PNG bytes of the viewport.
    pub async fn screenshot(&self) -> Result<Vec<u8>, WebDriverError> {
        let b64 = as_string(self.cmd(Method::GET, "/screenshot", None).await?)?;
        STANDARD.decode(b64.as_bytes()).map_err(|e| WebDriverError::Decode(e.to_string()))
    }

    pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, WebDriverError> {
        self.cmd(Method::POST, "/execute/sync", Some(json!({ "script": script, "args": args })))
            .await
    }

    // ── elements ──────────────────────────────────────────────────────────────

    pub async fn find(&self, locator: Locator<'_>) -> Result<Element, WebDriverError> {
        let v = self.cmd(Method::POST, "/element", Some(locator.to_json())).await?;
        Element::from_value(&v)
    }

    pub async fn find_all(&self, locator: Locator<'_>) -> Result<Vec<Element>, WebDriverError> {
        let v = self.cmd(Method::POST, "/elements", Some(locator.to_json())).await?;
        elements(&v)
    }

    /// Search below `parent` only.
    pub async fn find_in(&self, parent: &Element, locator: Locator<'_>) -> Result<Element, WebDriverError> {
        let path = format!("/element/{}/element", parent.id);
        let v = self.cmd(Method::POST, &path, Some(locator.to_json())).await?;
        Element::from_value(&v)
    }

    /// Poll for `locator` until it shows up or `timeout` passes.
    pub async fn wait_for(&self, locator: Locator<'_>, timeout: Duration) -> Result<Element, WebDriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.find(locator).await {
                Ok(el) => return Ok(el),
                Err(WebDriverError::NoSuchElement(_)) if Instant::now() < deadline => {
                    sleep(POLL_INTERVAL).await;
                }
                Err(WebDriverError::NoSuchElement(_)) => {
                    return Err(WebDriverError::Timeout { what: locator.describe(), after: timeout });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// First locator that matches within `timeout` each.
    pub async fn first_of(
        &self,
        locators: &[Locator<'_>],
        timeout: Duration,
    ) -> Result<Element, WebDriverError> {
        for &loc in locators {
            match self.wait_for(loc, timeout).await {
                Ok(el) => return Ok(el),
                Err(WebDriverError::Timeout { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(WebDriverError::NoSuchElement(format!("none of {} locators matched", locators.len())))
    }

    pub async fn click(&self, el: &Element) -> Result<(), WebDriverError> {
        self.cmd(Method::POST, &format!("/element/{}/click", el.id), Some(json!({})))
            .await?;
        Ok(())
    }

    /// Click through script, for buttons covered by overlays.
    pub async fn js_click(&self, el: &Element) -> Result<(), WebDriverError> {
        self.execute("arguments[0].click();", vec![el.to_arg()]).await?;
        Ok(())
    }

    pub async fn send_keys(&self, el: &Element, text: &str) -> Result<(), WebDriverError> {
        self.cmd(Method::POST, &format!("/element/{}/value", el.id), Some(json!({ "text": text })))
            .await?;
        Ok(())
    }

    pub async fn clear(&self, el: &Element) -> Result<(), WebDriverError> {
        self.cmd(Method::POST, &format!("/element/{}/clear", el.id), Some(json!({})))
            .await?;
        Ok(())
    }

    pub async fn text(&self, el: &Element) -> Result<String, WebDriverError> {
        as_string(self.cmd(Method::GET, &format!("/element/{}/text", el.id), None).await?)
    }

    /// `None` when the attribute is absent.
    pub async fn attribute(&self, el: &Element, name: &str) -> Result<Option<String>, WebDriverError> {
        let v = self
            .cmd(Method::GET, &format!("/element/{}/attribute/{name}", el.id), None)
            .await?;
        Ok(v.as_str().map(str::to_string))
    }

    /// End the session and close the browser.
    pub async fn quit(self) -> Result<(), WebDriverError> {
        self.cmd(Method::DELETE, "", None).await?;
        debug!(session = %self.session_id, "webdriver session closed");
        Ok(())
    }
}

async fn send(http: &Client, method: Method, url: &str, body: Option<Value>) -> Result<Value, WebDriverError> {
    let mut req = http.request(method, url);
    if let Some(b) = body {
        req = req.json(&b);
    }
    let resp = req.send().await?;
    let status = resp.status();
    let mut body: Value = resp.json().await?;
    let value = body.get_mut("value").map(Value::take).unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }
    let error = value.get("error").and_then(Value::as_str).unwrap_or("unknown error").to_string();
    let message = value.get("message").and_then(Value::as_str).unwrap_or_default().to_string();
    if error == "no such element" {
        return Err(WebDriverError::NoSuchElement(message));
    }
    Err(WebDriverError::Protocol { error, message })
}

fn as_string(v: Value) -> Result<String, WebDriverError> {
    match v {
        Value::String(s) => Ok(s),
        other => Err(WebDriverError::Decode(format!("expected string, got {other}"))),
    }
}

fn elements(v: &Value) -> Result<Vec<Element>, WebDriverError> {
    v.as_array()
        .ok_or_else(|| WebDriverError::Decode(format!("expected element list, got {v}")))?
        .iter()
        .map(Element::from_value)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locators_serialize_to_w3c_strategies() {
        assert_eq!(
            Locator::Css("a[href*='/status/']").to_json(),
            json!({ "using": "css selector", "value": "a[href*='/status/']" })
        );
        assert_eq!(Locator::XPath("//span").to_json()["using"], "xpath");
    }

    #[test]
    fn element_references_decode() {
        let v = json!([{ ELEMENT_KEY: "a" }, { ELEMENT_KEY: "b" }]);
        let els = elements(&v).unwrap();
        assert_eq!(els.len(), 2);
        assert_eq!(els[1].to_arg(), json!({ ELEMENT_KEY: "b" }));
        assert!(Element::from_value(&json!({ "id": "x" })).is_err());
    }

    #[test]
    fn headless_flag_is_appended() {
        assert!(!stealth_chrome_args(false).iter().any(|a| a.starts_with("--headless")));
        assert_eq!(stealth_chrome_args(true).last().map(String::as_str), Some("--headless=new"));
    }
}
