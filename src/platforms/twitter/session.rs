//! Browser-driven Twitter/X session: log in, post, reply, read the timeline.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::TwitterConfig;
use crate::credentials::TwitterCredentials;
use crate::platforms::PlatformError;

use super::totp;
use super::tweet::{Tweet, tweet_id_from_url};
use super::webdriver::{Element, Locator, WebDriver, WebDriverError, stealth_chrome_args};

const SHORT_WAIT: Duration = Duration::from_secs(5);
const LONG_WAIT: Duration = Duration::from_secs(15);

const NEXT_BUTTON: Locator<'static> = Locator::XPath("//span[text()='Next']");
const HOME_COLUMN: Locator<'static> = Locator::Css("div[data-testid='primaryColumn']");

const COMPOSE_BUTTONS: &[Locator<'static>] = &[
    Locator::Css("a[href='/compose/post']"),
    Locator::Css("a[href='/compose/tweet']"),
    Locator::Css("a[data-testid='SideNav_NewTweet_Button']"),
    Locator::Css("div[aria-label='New post']"),
    Locator::XPath("//span[text()='Post']"),
];

const TEXTBOXES: &[Locator<'static>] = &[
    Locator::Css("div[data-testid='tweetTextarea_0']"),
    Locator::Css("div[role='textbox'][contenteditable='true']"),
    Locator::Css("div[aria-label='Post text']"),
    Locator::Css("div.public-DraftEditor-content[contenteditable='true']"),
];

const POST_BUTTONS: &[Locator<'static>] = &[
    Locator::Css("button[data-testid='tweetButton']"),
    Locator::Css("div[data-testid='tweetButton']"),
    Locator::Css("button[data-testid='tweetButtonInline']"),
    Locator::Css("div[data-testid='tweetButtonInline']"),
    Locator::Css("div[role='button'][data-testid*='tweet']"),
];

const STATUS_LINK: Locator<'static> = Locator::Css("a[href*='/status/']");
const TWEET_ARTICLE: Locator<'static> = Locator::Css("article[data-testid='tweet']");
const CHALLENGE_MARKERS: [&str; 3] = ["challenge", "unusual_activity", "verify"];

const STEALTH_SCRIPT: &str = "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });\
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });";

pub struct TwitterSession {
    driver: WebDriver,
    base_url: String,
    debug_dir: Option<PathBuf>,
    username: Option<String>,
}

impl TwitterSession {
    /// Start a browser and mask the usual automation fingerprints.
    pub async fn open(config: &TwitterConfig) -> Result<Self, PlatformError> {
        let driver = WebDriver::connect(&config.webdriver_url, &stealth_chrome_args(config.headless)).await?;
        if let Err(e) = driver.execute(STEALTH_SCRIPT, Vec::new()).await {
            warn!(error = %e, "stealth script failed");
        }
        Ok(Self {
            driver,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            debug_dir: config.debug_dir.clone(),
            username: None,
        })
    }

    pub fn is_logged_in(&self) -> bool {
        self.username.is_some()
    }

    /// Username, optional email check, password, optional 2FA code.
    pub async fn login(&mut self, creds: &TwitterCredentials) -> Result<(), PlatformError> {
        let result = self.login_steps(creds).await;
        match result {
            Ok(()) => {
                self.username = Some(creds.username.clone());
                info!(user = %creds.username, "logged in to twitter");
                Ok(())
            }
            Err(e) => {
                self.save_debug("login_failed").await;
                Err(e)
            }
        }
    }

    async fn login_steps(&self, creds: &TwitterCredentials) -> Result<(), PlatformError> {
        let d = &self.driver;
        d.navigate(&format!("{}/i/flow/login", self.base_url)).await?;
        human_pause(2000, 4000).await;

        let user = d.wait_for(Locator::Css("input[autocomplete='username']"), LONG_WAIT).await?;
        d.send_keys(&user, &creds.username).await?;
        d.click(&d.wait_for(NEXT_BUTTON, SHORT_WAIT).await?).await?;
        human_pause(1500, 3000).await;

        // Unusual-login check asks for the email or phone first.
        if let Some(field) = optional(d.wait_for(Locator::Css("input[data-testid='ocfEnterTextTextInput']"), SHORT_WAIT).await)? {
            debug!("email verification requested");
            d.send_keys(&field, &creds.email).await?;
            d.click(&d.wait_for(NEXT_BUTTON, SHORT_WAIT).await?).await?;
            human_pause(1500, 3000).await;
        }

        let password = d.wait_for(Locator::Css("input[type='password']"), LONG_WAIT).await?;
        d.send_keys(&password, &creds.password).await?;
        d.click(&d.wait_for(Locator::XPath("//span[text()='Log in']"), SHORT_WAIT).await?).await?;
        human_pause(2000, 4000).await;

        if let Some(field) = optional(d.wait_for(Locator::Css("input[inputmode='numeric']"), SHORT_WAIT).await)? {
            let secret = creds
                .totp_secret
                .as_deref()
                .ok_or_else(|| PlatformError::Auth("account requires 2FA but no secret is configured".into()))?;
            let code = totp::code(secret, Utc::now().timestamp().max(0) as u64)?;
            d.send_keys(&field, &code).await?;
            d.click(&d.wait_for(NEXT_BUTTON, SHORT_WAIT).await?).await?;
        }

        d.wait_for(HOME_COLUMN, LONG_WAIT)
            .await
            .map_err(|e| PlatformError::Auth(format!("home timeline never appeared: {e}")))?;
        Ok(())
    }

    /// Compose, type and send. Returns the new tweet's id.
    pub async fn post_tweet(&self, tweet: &Tweet) -> Result<String, PlatformError> {
        let d = &self.driver;
        d.navigate(&format!("{}/home", self.base_url)).await?;
        human_pause(1500, 3500).await;
        self.reject_challenge().await?;

        let compose = d.first_of(COMPOSE_BUTTONS, SHORT_WAIT).await?;
        self.press(&compose).await?;
        human_pause(800, 2000).await;

        let textbox = d.first_of(TEXTBOXES, SHORT_WAIT).await?;
        d.click(&textbox).await?;
        if let Err(e) = d.send_keys(&textbox, tweet.content()).await {
            debug!(error = %e, "typing failed, filling editor through script");
            d.execute("arguments[0].innerText = arguments[1];", vec![textbox.to_arg(), tweet.content().into()])
                .await?;
            d.execute(
                "arguments[0].dispatchEvent(new Event('input', { bubbles: true }));",
                vec![textbox.to_arg()],
            )
            .await?;
        }
        human_pause(800, 2000).await;

        let button = d.first_of(POST_BUTTONS, SHORT_WAIT).await?;
        self.press(&button).await?;
        human_pause(2500, 4000).await;
        self.reject_challenge().await?;

        if let Some(id) = self.newest_status_id(None).await? {
            return Ok(id);
        }
        match self.find_own_tweet(tweet.content()).await {
            Some(id) => Ok(id),
            None => {
                self.save_debug("tweet_id_failed").await;
                Err(PlatformError::Browser("tweet sent but its id was not found".into()))
            }
        }
    }

    /// Look for a just-posted tweet among the newest on our own profile.
    async fn find_own_tweet(&self, content: &str) -> Option<String> {
        let head: String = content.chars().take(50).collect();
        match self.timeline(5).await {
            Ok(tweets) => tweets
                .into_iter()
                .find(|t| t.content().starts_with(head.trim()))
                .and_then(|t| t.tweet_id),
            Err(e) => {
                debug!(error = %e, "timeline lookup failed");
                None
            }
        }
    }

    /// Reply under `tweet_id`. The reply's own id when it can be read back.
    pub async fn reply_to_tweet(&self, tweet_id: &str, text: &str) -> Result<Option<String>, PlatformError> {
        let d = &self.driver;
        d.navigate(&format!("{}/i/status/{tweet_id}", self.base_url)).await?;
        human_pause(1500, 3000).await;
        self.reject_challenge().await?;

        let reply = d.wait_for(Locator::Css("[data-testid='reply']"), LONG_WAIT).await?;
        self.press(&reply).await?;
        let textbox = d.first_of(TEXTBOXES, SHORT_WAIT).await?;
        d.send_keys(&textbox, text).await?;
        human_pause(800, 2000).await;
        let button = d.first_of(POST_BUTTONS, SHORT_WAIT).await?;
        self.press(&button).await?;
        human_pause(2500, 4000).await;

        self.newest_status_id(Some(tweet_id)).await
    }

    /// Up to `limit` tweets from our own profile, newest first.
    pub async fn timeline(&self, limit: usize) -> Result<Vec<Tweet>, PlatformError> {
        let user = self
            .username
            .as_deref()
            .ok_or_else(|| PlatformError::Auth("not logged in".into()))?;
        self.profile_timeline(user, limit).await
    }

    /// Up to `limit` tweets from `user`'s profile page, scrolling until the
    /// page stops growing.
    pub async fn profile_timeline(&self, user: &str, limit: usize) -> Result<Vec<Tweet>, PlatformError> {
        let d = &self.driver;
        d.navigate(&format!("{}/{user}", self.base_url)).await?;
        d.wait_for(TWEET_ARTICLE, LONG_WAIT).await?;

        let mut out: Vec<Tweet> = Vec::new();
        let mut last_height = scroll_height(d).await?;
        while out.len() < limit {
            for article in d.find_all(TWEET_ARTICLE).await? {
                if out.len() >= limit {
                    break;
                }
                let Some(id) = self.article_id(&article).await else { continue };
                if out.iter().any(|t| t.tweet_id.as_deref() == Some(id.as_str())) {
                    continue;
                }
                let text = match d.find_in(&article, Locator::Css("div[data-testid='tweetText']")).await {
                    Ok(el) => d.text(&el).await?,
                    Err(_) => continue,
                };
                if let Ok(mut tweet) = Tweet::new(text) {
                    tweet.tweet_id = Some(id);
                    tweet.username = Some(user.to_string());
                    out.push(tweet);
                }
            }
            d.execute("window.scrollTo(0, document.body.scrollHeight);", Vec::new()).await?;
            human_pause(1500, 2500).await;
            let height = scroll_height(d).await?;
            if height <= last_height {
                break;
            }
            last_height = height;
        }
        Ok(out)
    }

    /// Screenshot and page source into the debug directory, if one is set.
    pub async fn save_debug(&self, stage: &str) {
        let Some(dir) = &self.debug_dir else { return };
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(dir = %dir.display(), error = %e, "cannot create debug dir");
            return;
        }
        let stem = format!("{stage}_{}", Utc::now().format("%Y%m%d_%H%M%S"));
        match self.driver.screenshot().await {
            Ok(png) => {
                if let Err(e) = tokio::fs::write(dir.join(format!("{stem}.png")), png).await {
                    warn!(error = %e, "screenshot not written");
                }
            }
            Err(e) => warn!(error = %e, "screenshot failed"),
        }
        match self.driver.page_source().await {
            Ok(html) => {
                if let Err(e) = tokio::fs::write(dir.join(format!("{stem}.html")), html).await {
                    warn!(error = %e, "page source not written");
                }
            }
            Err(e) => warn!(error = %e, "page source failed"),
        }
        if let Ok(url) = self.driver.current_url().await {
            info!(%stage, %url, dir = %dir.display(), "saved debug snapshot");
        }
    }

    pub async fn close(self) {
        if let Err(e) = self.driver.quit().await {
            warn!(error = %e, "closing browser session failed");
        }
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    async fn reject_challenge(&self) -> Result<(), PlatformError> {
        let url = self.driver.current_url().await?.to_lowercase();
        if CHALLENGE_MARKERS.iter().any(|m| url.contains(m)) {
            self.save_debug("security_challenge").await;
            return Err(PlatformError::Auth(format!("security challenge at {url}")));
        }
        Ok(())
    }

    /// Native click, falling back to a script click when something overlays
    /// the element.
    async fn press(&self, el: &Element) -> Result<(), PlatformError> {
        if let Err(e) = self.driver.click(el).await {
            debug!(error = %e, "click intercepted, using script click");
            self.driver.js_click(el).await?;
        }
        Ok(())
    }

    /// Id from the latest status link on the page (other than `exclude`),
    /// falling back to the current URL.
    async fn newest_status_id(&self, exclude: Option<&str>) -> Result<Option<String>, PlatformError> {
        let d = &self.driver;
        let _ = optional(d.wait_for(STATUS_LINK, SHORT_WAIT).await)?;
        for link in d.find_all(STATUS_LINK).await? {
            if let Some(id) = d.attribute(&link, "href").await?.as_deref().and_then(tweet_id_from_url) {
                if Some(id.as_str()) != exclude {
                    return Ok(Some(id));
                }
            }
        }
        Ok(tweet_id_from_url(&d.current_url().await?).filter(|id| Some(id.as_str()) != exclude))
    }

    async fn article_id(&self, article: &Element) -> Option<String> {
        let link = self.driver.find_in(article, STATUS_LINK).await.ok()?;
        let href = self.driver.attribute(&link, "href").await.ok()??;
        tweet_id_from_url(&href)
    }
}

/// A step that may legitimately not show up: missing element is `None`.
fn optional(r: Result<Element, WebDriverError>) -> Result<Option<Element>, WebDriverError> {
    match r {
        Ok(el) => Ok(Some(el)),
        Err(WebDriverError::Timeout { .. } | WebDriverError::NoSuchElement(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

async fn scroll_height(d: &WebDriver) -> Result<i64, WebDriverError> {
    Ok(d.execute("return document.body.scrollHeight;", Vec::new()).await?.as_i64().unwrap_or(0))
}

async fn human_pause(min_ms: u64, max_ms: u64) {
    let ms = rand::thread_rng().gen_range(min_ms..=max_ms);
    sleep(Duration::from_millis(ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_swallows_only_absence() {
        let missing = Err(WebDriverError::Timeout { what: "x".into(), after: SHORT_WAIT });
        assert!(optional(missing).unwrap().is_none());
        let gone = Err(WebDriverError::NoSuchElement("x".into()));
        assert!(optional(gone).unwrap().is_none());
        let broken = Err(WebDriverError::Protocol { error: "invalid session id".into(), message: String::new() });
        assert!(optional(broken).is_err());
    }
}
