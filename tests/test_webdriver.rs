//! WebDriver wire protocol against a mock driver.

use std::time::Duration;

use mockito::{Matcher, Server, ServerGuard};
use persona_bot::platforms::twitter::{Locator, WebDriver, WebDriverError};

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

async fn session(server: &mut ServerGuard) -> WebDriver {
    server
        .mock("POST", "/session")
        .match_body(Matcher::PartialJsonString(
            r#"{"capabilities":{"alwaysMatch":{"browserName":"chrome"}}}"#.to_string(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"value":{"sessionId":"s1","capabilities":{"browserName":"chrome"}}}"#)
        .create_async()
        .await;
    WebDriver::connect(&server.url(), &["--headless=new".to_string()]).await.unwrap()
}

#[tokio::test]
async fn connect_navigate_and_read_text() {
    let mut server = Server::new_async().await;
    let driver = session(&mut server).await;
    assert_eq!(driver.session_id(), "s1");

    let nav = server
        .mock("POST", "/session/s1/url")
        .match_body(Matcher::PartialJsonString(r#"{"url":"https://x.com/home"}"#.to_string()))
        .with_status(200)
        .with_body(r#"{"value":null}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/session/s1/element")
        .match_body(Matcher::PartialJsonString(
            r#"{"using":"css selector","value":"[data-testid='tweetText']"}"#.to_string(),
        ))
        .with_status(200)
        .with_body(format!(r#"{{"value":{{"{ELEMENT_KEY}":"e1"}}}}"#))
        .create_async()
        .await;
    server
        .mock("GET", "/session/s1/element/e1/text")
        .with_status(200)
        .with_body(r#"{"value":"gm frens"}"#)
        .create_async()
        .await;

    driver.navigate("https://x.com/home").await.unwrap();
    let el = driver.find(Locator::Css("[data-testid='tweetText']")).await.unwrap();
    assert_eq!(driver.text(&el).await.unwrap(), "gm frens");
    nav.assert_async().await;
}

#[tokio::test]
async fn missing_element_and_timeout() {
    let mut server = Server::new_async().await;
    let driver = session(&mut server).await;
    server
        .mock("POST", "/session/s1/element")
        .with_status(404)
        .with_body(r#"{"value":{"error":"no such element","message":"Unable to locate element","stacktrace":""}}"#)
        .create_async()
        .await;

    let err = driver.find(Locator::XPath("//span[text()='Next']")).await.unwrap_err();
    assert!(matches!(err, WebDriverError::NoSuchElement(ref m) if m.contains("Unable to locate")));

    let err = driver.wait_for(Locator::XPath("//span"), Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, WebDriverError::Timeout { .. }), "{err:?}");
    assert!(err.to_string().contains("xpath `//span`"));
}

#[tokio::test]
async fn protocol_errors_keep_code_and_message() {
    let mut server = Server::new_async().await;
    let driver = session(&mut server).await;
    server
        .mock("POST", "/session/s1/execute/sync")
        .with_status(500)
        .with_body(r#"{"value":{"error":"javascript error","message":"boom is not defined"}}"#)
        .create_async()
        .await;

    match driver.execute("return boom;", vec![]).await.unwrap_err() {
        WebDriverError::Protocol { error, message } => {
            assert_eq!(error, "javascript error");
            assert_eq!(message, "boom is not defined");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn screenshot_attribute_and_quit() {
    let mut server = Server::new_async().await;
    let driver = session(&mut server).await;
    server
        .mock("GET", "/session/s1/screenshot")
        .with_status(200)
        .with_body(r#"{"value":"iVBORw0KGgo="}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/session/s1/elements")
        .with_status(200)
        .with_body(format!(r#"{{"value":[{{"{ELEMENT_KEY}":"a1"}},{{"{ELEMENT_KEY}":"a2"}}]}}"#))
        .create_async()
        .await;
    server
        .mock("GET", "/session/s1/element/a2/attribute/href")
        .with_status(200)
        .with_body(r#"{"value":"https://x.com/bot/status/1789"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/session/s1/element/a1/attribute/href")
        .with_status(200)
        .with_body(r#"{"value":null}"#)
        .create_async()
        .await;
    let quit = server
        .mock("DELETE", "/session/s1")
        .with_status(200)
        .with_body(r#"{"value":null}"#)
        .create_async()
        .await;

    let png = driver.screenshot().await.unwrap();
    assert_eq!(&png[..4], b"\x89PNG");

    let links = driver.find_all(Locator::Css("a[href*='/status/']")).await.unwrap();
    assert_eq!(links.len(), 2);
    assert_eq!(driver.attribute(&links[0], "href").await.unwrap(), None);
    assert_eq!(
        driver.attribute(&links[1], "href").await.unwrap().as_deref(),
        Some("https://x.com/bot/status/1789")
    );

    driver.quit().await.unwrap();
    quit.assert_async().await;
}
