use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivers a text message to a user through the chat front end.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify_user(&self, user_id: i64, text: &str) -> Result<(), anyhow::Error>;
}

#[derive(Serialize)]
struct Notification<'a> {
    user_id: i64,
    text: &'a str,
}

/// Posts notifications as JSON to the front end's webhook.
#[derive(Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(url: String) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder().timeout(NOTIFY_TIMEOUT).build()?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify_user(&self, user_id: i64, text: &str) -> Result<(), anyhow::Error> {
        self.client
            .post(&self.url)
            .json(&Notification { user_id, text })
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

/// Used when no front end is configured.
#[derive(Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_user(&self, user_id: i64, text: &str) -> Result<(), anyhow::Error> {
        log::info!("Notification for user {}: {}", user_id, text);
        Ok(())
    }
}
