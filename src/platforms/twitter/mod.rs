//! Twitter/X through a real browser session driven over WebDriver.

mod bot;
mod session;
pub mod totp;
mod tweet;
pub mod webdriver;

pub use bot::{TickReport, TwitterBot};
pub use session::TwitterSession;
pub use tweet::{MAX_MEDIA_ITEMS, MAX_TWEET_CHARS, Tweet, tweet_id_from_url};
pub use webdriver::{Element, Locator, WebDriver, WebDriverError};
