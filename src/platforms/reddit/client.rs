//! Reddit OAuth2 client (script app, password grant) over `reqwest`.
//!
//! Tokens are fetched lazily and refreshed a minute before they expire.
//! Write endpoints use `api_type=json` so errors come back as a list instead
//! of an HTML page; a `RATELIMIT` entry maps to [`PlatformError::RateLimited`].

use std::future::Future;
use std::time::{Duration, Instant};

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RedditConfig;
use crate::credentials::RedditCredentials;
use crate::platforms::PlatformError;
use crate::runtime::sleep_or_cancel;

use super::types::{
    ApiEnvelope, Created, Flair, Listing, Me, RedditPost, TokenResponse, VoteDirection,
};

const TOKEN_SLACK: Duration = Duration::from_secs(60);
const DEFAULT_RATELIMIT_WAIT: Duration = Duration::from_secs(60);

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct RedditClient {
    http: Client,
    creds: RedditCredentials,
    auth_url: String,
    api_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for RedditClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditClient")
            .field("api_base", &self.api_base)
            .field("username", &self.creds.username)
            .finish()
    }
}

impl RedditClient {
    pub fn new(config: &RedditConfig, creds: RedditCredentials) -> Result<Self, PlatformError> {
        Self::with_endpoints(creds, &config.auth_url, &config.api_base)
    }

    /// Point the client at explicit endpoints (tests use a local mock server).
    pub fn with_endpoints(
        creds: RedditCredentials,
        auth_url: &str,
        api_base: &str,
    ) -> Result<Self, PlatformError> {
        let http = Client::builder()
            .user_agent(creds.user_agent.clone())
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PlatformError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            creds,
            auth_url: auth_url.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        })
    }

    /// Return a valid bearer token, fetching a new one when needed.
    pub async fn authenticate(&self) -> Result<String, PlatformError> {
        let mut guard = self.token.lock().await;
        if let Some(t) = guard.as_ref() {
            if Instant::now() + TOKEN_SLACK < t.expires_at {
                return Ok(t.value.clone());
            }
        }

        debug!(username = %self.creds.username, "requesting reddit access token");
        let resp = self
            .http
            .post(&self.auth_url)
            .basic_auth(&self.creds.client_id, Some(&self.creds.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", self.creds.username.as_str()),
                ("password", self.creds.password.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(PlatformError::Auth(format!("token endpoint returned {status}")));
        }
        if !status.is_success() {
            return Err(PlatformError::Api(format!("token endpoint returned {status}")));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| PlatformError::Api(format!("bad token response: {e}")))?;
        let value = match (body.access_token, body.error) {
            (Some(tok), _) if !tok.is_empty() => tok,
            (_, Some(err)) => return Err(PlatformError::Auth(err)),
            _ => return Err(PlatformError::Auth("no access_token in response".into())),
        };
        let ttl = Duration::from_secs(body.expires_in.unwrap_or(3600));
        *guard = Some(CachedToken { value: value.clone(), expires_at: Instant::now() + ttl });
        info!(ttl_secs = ttl.as_secs(), "reddit token acquired");
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    // ── request plumbing ──────────────────────────────────────────────────────

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PlatformError> {
        let token = self.authenticate().await?;
        let url = format!("{}{path}", self.api_base);
        let resp = self.http.get(&url).bearer_auth(token).query(&[("raw_json", "1")]).send().await?;
        let resp = self.check(resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| PlatformError::Api(format!("unexpected response from {path}: {e}")))
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<Response, PlatformError> {
        let token = self.authenticate().await?;
        let url = format!("{}{path}", self.api_base);
        let resp = self.http.post(&url).bearer_auth(token).form(form).send().await?;
        self.check(resp).await
    }

    /// Map HTTP failures onto [`PlatformError`].
    async fn check(&self, resp: Response) -> Result<Response, PlatformError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        match status {
            StatusCode::UNAUTHORIZED => {
                self.invalidate_token().await;
                Err(PlatformError::Auth("token rejected (401)".into()))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = resp
                    .headers()
                    .get("x-ratelimit-reset")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<f64>().ok())
                    .map(|s| Duration::from_secs(s.ceil() as u64))
                    .unwrap_or(DEFAULT_RATELIMIT_WAIT);
                Err(PlatformError::RateLimited { retry_after })
            }
            StatusCode::NOT_FOUND => Err(PlatformError::NotFound(resp.url().path().to_string())),
            _ => {
                let body = resp.text().await.unwrap_or_default();
                Err(PlatformError::Api(format!("HTTP {status}: {}", body.trim())))
            }
        }
    }

    // ── read endpoints ────────────────────────────────────────────────────────

    /// Name of the authenticated account.
    pub async fn me(&self) -> Result<String, PlatformError> {
        let me: Me = self.get_json("/api/v1/me").await?;
        Ok(me.name)
    }

    /// `false` for banned, private or missing subreddits.
    pub async fn subreddit_exists(&self, sub: &str) -> Result<bool, PlatformError> {
        let token = self.authenticate().await?;
        let url = format!("{}/r/{sub}/about", self.api_base);
        let resp = self.http.get(&url).bearer_auth(token).send().await?;
        match resp.status() {
            s if s.is_success() => {
                let v: serde_json::Value = resp
                    .json()
                    .await
                    .map_err(|e| PlatformError::Api(format!("bad about response: {e}")))?;
                Ok(v.get("kind").and_then(|k| k.as_str()) == Some("t5"))
            }
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => Ok(false),
            _ => self.check(resp).await.map(|_| false),
        }
    }

    pub async fn new_posts(&self, sub: &str, limit: u32) -> Result<Vec<RedditPost>, PlatformError> {
        self.listing(&format!("/r/{sub}/new?limit={limit}")).await
    }

    pub async fn hot_posts(&self, sub: &str, limit: u32) -> Result<Vec<RedditPost>, PlatformError> {
        self.listing(&format!("/r/{sub}/hot?limit={limit}")).await
    }

    async fn listing(&self, path: &str) -> Result<Vec<RedditPost>, PlatformError> {
        let listing: Listing<RedditPost> = self.get_json(path).await?;
        Ok(listing.data.children.into_iter().map(|t| t.data).collect())
    }

    /// Current numbers for up to 100 posts by fullname (`t3_…`), in the
    /// order Reddit returns them. Deleted posts are simply absent.
    pub async fn post_stats(&self, fullnames: &[String]) -> Result<Vec<RedditPost>, PlatformError> {
        if fullnames.is_empty() {
            return Ok(Vec::new());
        }
        let ids = fullnames.iter().take(100).map(String::as_str).collect::<Vec<_>>().join(",");
        self.listing(&format!("/api/info?id={ids}")).await
    }

    /// Link flairs users may pick; empty when the subreddit has none.
    pub async fn link_flairs(&self, sub: &str) -> Result<Vec<Flair>, PlatformError> {
        match self.get_json(&format!("/r/{sub}/api/link_flair_v2")).await {
            Ok(flairs) => Ok(flairs),
            // Subreddits without flair permissions answer 403/404.
            Err(PlatformError::NotFound(_)) => Ok(Vec::new()),
            Err(PlatformError::Api(msg)) if msg.contains("403") => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    // ── write endpoints ───────────────────────────────────────────────────────

    pub async fn submit_self(
        &self,
        sub: &str,
        title: &str,
        text: &str,
        flair_id: Option<&str>,
    ) -> Result<Created, PlatformError> {
        let mut form = vec![
            ("api_type", "json"),
            ("kind", "self"),
            ("sr", sub),
            ("title", title),
            ("text", text),
        ];
        if let Some(f) = flair_id {
            form.push(("flair_id", f));
        }
        let env = self.post_api(&form, "/api/submit").await?;
        env.json
            .data
            .and_then(|d| d.name)
            .map(|fullname| Created { fullname })
            .ok_or_else(|| PlatformError::Api("submit response had no post name".into()))
    }

    /// Reply to a post (`t3_…`) or comment (`t1_…`).
    pub async fn comment(&self, parent_fullname: &str, text: &str) -> Result<Created, PlatformError> {
        let form = [("api_type", "json"), ("thing_id", parent_fullname), ("text", text)];
        let env = self.post_api(&form, "/api/comment").await?;
        env.json
            .data
            .and_then(|d| d.things.into_iter().next())
            .map(|t| Created { fullname: t.data.name })
            .ok_or_else(|| PlatformError::Api("comment response had no thing".into()))
    }

    pub async fn vote(&self, fullname: &str, dir: VoteDirection) -> Result<(), PlatformError> {
        self.post_form("/api/vote", &[("id", fullname), ("dir", dir.as_param())]).await?;
        Ok(())
    }

    async fn post_api(&self, form: &[(&str, &str)], path: &str) -> Result<ApiEnvelope, PlatformError> {
        let resp = self.post_form(path, form).await?;
        let env: ApiEnvelope = resp
            .json()
            .await
            .map_err(|e| PlatformError::Api(format!("unexpected response from {path}: {e}")))?;
        api_errors(&env)?;
        Ok(env)
    }
}

/// Turn the first entry of an `api_type=json` error list into a [`PlatformError`].
fn api_errors(env: &ApiEnvelope) -> Result<(), PlatformError> {
    let Some(first) = env.json.errors.first() else {
        return Ok(());
    };
    let code = first.first().and_then(|v| v.as_str()).unwrap_or("UNKNOWN");
    let message = first.get(1).and_then(|v| v.as_str()).unwrap_or("");
    if code == "RATELIMIT" {
        let retry_after = parse_ratelimit_wait(message).unwrap_or(DEFAULT_RATELIMIT_WAIT);
        return Err(PlatformError::RateLimited { retry_after });
    }
    Err(PlatformError::Api(format!("{code}: {message}")))
}

/// Read "try again in 9 minutes" / "in 30 seconds" out of a RATELIMIT message.
fn parse_ratelimit_wait(message: &str) -> Option<Duration> {
    let lower = message.to_ascii_lowercase();
    let rest = &lower[lower.find(" in ")? + 4..];
    let mut words = rest.split_whitespace();
    let n: u64 = words.next()?.parse().ok()?;
    let unit = words.next()?;
    if unit.starts_with("minute") {
        Some(Duration::from_secs(n.saturating_mul(60)))
    } else if unit.starts_with("second") {
        Some(Duration::from_secs(n))
    } else {
        None
    }
}

/// Pick a flair: the first preferred substring (case-insensitive) that matches
/// any flair text wins; otherwise the first flair.
pub fn choose_flair<'a>(flairs: &'a [Flair], preferred: &[String]) -> Option<&'a Flair> {
    preferred
        .iter()
        .map(|p| p.to_lowercase())
        .find_map(|p| flairs.iter().find(|f| f.text.to_lowercase().contains(&p)))
        .or_else(|| flairs.first())
}

/// Run `op`, retrying on [`PlatformError::RateLimited`] up to `attempts`
/// times. The wait grows linearly: `base_wait × attempt`.
pub async fn with_rate_limit_retry<T, F, Fut>(
    attempts: u32,
    base_wait: Duration,
    shutdown: &CancellationToken,
    mut op: F,
) -> Result<T, PlatformError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PlatformError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(PlatformError::RateLimited { retry_after }) if attempt < attempts => {
                let wait = base_wait * attempt;
                warn!(
                    attempt,
                    wait_secs = wait.as_secs(),
                    suggested_secs = retry_after.as_secs(),
                    "reddit rate limit hit, backing off"
                );
                if !sleep_or_cancel(wait, shutdown).await {
                    return Err(PlatformError::RateLimited { retry_after });
                }
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn flair(id: &str, text: &str) -> Flair {
        Flair { id: id.into(), text: text.into() }
    }

    #[test]
    fn flair_preference_order() {
        let flairs = vec![flair("1", "Meme"), flair("2", "Strategy Talk"), flair("3", "General")];
        let prefs: Vec<String> = ["discussion", "general", "strategy"].iter().map(|s| s.to_string()).collect();
        assert_eq!(choose_flair(&flairs, &prefs).unwrap().id, "3");
        assert_eq!(choose_flair(&flairs, &[]).unwrap().id, "1");
        assert!(choose_flair(&[], &prefs).is_none());
    }

    #[test]
    fn ratelimit_message_parsing() {
        assert_eq!(
            parse_ratelimit_wait("you are doing that too much. try again in 9 minutes."),
            Some(Duration::from_secs(540))
        );
        assert_eq!(parse_ratelimit_wait("Try again in 30 seconds"), Some(Duration::from_secs(30)));
        assert_eq!(parse_ratelimit_wait("slow down"), None);
        assert_eq!(
            parse_ratelimit_wait(&format!("try again in {} minutes", u64::MAX)),
            Some(Duration::from_secs(u64::MAX))
        );
    }

    #[test]
    fn api_error_list_maps() {
        let env: ApiEnvelope = serde_json::from_str(
            r#"{"json":{"errors":[["RATELIMIT","try again in 2 minutes.","ratelimit"]]}}"#,
        )
        .unwrap();
        match api_errors(&env) {
            Err(PlatformError::RateLimited { retry_after }) => assert_eq!(retry_after.as_secs(), 120),
            other => panic!("unexpected: {other:?}"),
        }

        let env: ApiEnvelope =
            serde_json::from_str(r#"{"json":{"errors":[["SUBREDDIT_NOEXIST","that subreddit doesn't exist","sr"]]}}"#)
                .unwrap();
        let err = api_errors(&env).unwrap_err().to_string();
        assert!(err.contains("SUBREDDIT_NOEXIST"));
    }

    #[tokio::test]
    async fn retry_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let res: Result<(), _> = with_rate_limit_retry(3, Duration::ZERO, &token, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PlatformError::RateLimited { retry_after: Duration::from_secs(1) }) }
        })
        .await;
        assert!(matches!(res, Err(PlatformError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let res = with_rate_limit_retry(3, Duration::ZERO, &token, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(PlatformError::RateLimited { retry_after: Duration::from_secs(1) })
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(res, 1);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let res: Result<(), _> = with_rate_limit_retry(3, Duration::ZERO, &token, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PlatformError::Api("nope".into())) }
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
