use async_trait::async_trait;
use tracing::{debug, info};
use wallabag::{NewEntry, WallabagClient, WallabagError};

use crate::config::Config;
use crate::delivery::traits::Delivery;
use crate::domain::link::mirror_medium_link;
use crate::domain::{CandidateItem, DeliveryOutcome};
use crate::errors::FeedbagResult;

pub struct WallabagDelivery {
    client: WallabagClient,
    medium_mirror: Option<String>,
}

impl WallabagDelivery {
    pub fn new(client: WallabagClient, medium_mirror: Option<String>) -> Self {
        Self {
            client,
            medium_mirror,
        }
    }

    pub fn from_config(config: &Config) -> FeedbagResult<Self> {
        let credentials = config.wallabag_credentials()?;
        let client = WallabagClient::new(credentials, config.http_timeout)?;
        Ok(Self::new(client, config.medium_mirror_url.clone()))
    }

    fn entry_for(&self, item: &CandidateItem) -> NewEntry {
        let url = match &self.medium_mirror {
            Some(mirror) => mirror_medium_link(&item.link, mirror),
            None => item.link.clone(),
        };

        NewEntry {
            url,
            title: Some(item.title.clone()).filter(|t| !t.is_empty()),
            tags: item.tags.iter().cloned().collect(),
        }
    }
}

#[async_trait]
impl Delivery for WallabagDelivery {
    async fn deliver(&self, item: &CandidateItem) -> DeliveryOutcome {
        let entry = self.entry_for(item);

        let result = match self.client.create_entry(&entry).await {
            // An expired token gets exactly one refresh-and-retry
            Err(WallabagError::Unauthorized) => {
                debug!("Access token rejected, requesting a new one");
                self.client.invalidate_token().await;
                self.client.create_entry(&entry).await
            }
            other => other,
        };

        match result {
            Ok(created) => {
                info!("Created Wallabag entry {}: {}", created.id, entry.url);
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                let retry_after = match &e {
                    WallabagError::RateLimited { retry_after } => *retry_after,
                    _ => None,
                };
                DeliveryOutcome::failed(e.to_string(), e.is_transient()).with_retry_after(retry_after)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FeedConfig, FeedEntry};
    use serde_json::json;
    use std::time::Duration;
    use wallabag::Credentials;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn delivery_for(server: &MockServer, mirror: Option<&str>) -> WallabagDelivery {
        let credentials = Credentials {
            base_url: server.uri(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
        };
        let client = WallabagClient::new(credentials, Duration::from_secs(5)).unwrap();
        WallabagDelivery::new(client, mirror.map(str::to_string))
    }

    fn item(link: &str) -> CandidateItem {
        let feed = FeedConfig::new("Blog", "https://example.com/feed").with_tags(["b", "a"]);
        let entry = FeedEntry::new("Post").with_link(Some(link.to_string()));
        CandidateItem::from_entry(&feed, entry).unwrap()
    }

    async fn mount_token(server: &MockServer, expected_calls: u64) {
        Mock::given(method("POST"))
            .and(path("/oauth/v2/token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "access_token": "t", "expires_in": 3600 })),
            )
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_delivered_with_tags_and_title() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/entries.json"))
            .and(body_json(json!({
                "url": "https://example.com/post",
                "title": "Post",
                "tags": "a,b"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 7 })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = delivery_for(&server, None)
            .deliver(&item("https://example.com/post"))
            .await;

        assert_eq!(outcome, DeliveryOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_once() {
        let server = MockServer::start().await;
        mount_token(&server, 2).await;
        Mock::given(method("POST"))
            .and(path("/api/entries.json"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/entries.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 8 })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = delivery_for(&server, None)
            .deliver(&item("https://example.com/post"))
            .await;

        assert_eq!(outcome, DeliveryOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_persistent_unauthorized_is_retriable_failure() {
        let server = MockServer::start().await;
        mount_token(&server, 2).await;
        Mock::given(method("POST"))
            .and(path("/api/entries.json"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let outcome = delivery_for(&server, None)
            .deliver(&item("https://example.com/post"))
            .await;

        assert!(outcome.is_retriable());
    }

    #[tokio::test]
    async fn test_rejected_entry_is_permanent_failure() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/entries.json"))
            .respond_with(ResponseTemplate::new(422).set_body_string("invalid url"))
            .mount(&server)
            .await;

        let outcome = delivery_for(&server, None)
            .deliver(&item("https://example.com/post"))
            .await;

        assert!(matches!(outcome, DeliveryOutcome::Failed { retriable: false, .. }));
    }

    #[tokio::test]
    async fn test_rate_limit_is_retriable_failure() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/entries.json"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let outcome = delivery_for(&server, None)
            .deliver(&item("https://example.com/post"))
            .await;

        assert!(outcome.is_retriable());
        assert_eq!(outcome.retry_after(), None);
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/entries.json"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .mount(&server)
            .await;

        let outcome = delivery_for(&server, None)
            .deliver(&item("https://example.com/post"))
            .await;

        assert!(outcome.is_retriable());
        assert_eq!(outcome.retry_after(), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_medium_links_use_mirror() {
        let server = MockServer::start().await;
        mount_token(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/api/entries.json"))
            .and(body_json(json!({
                "url": "https://freedium-mirror.cfd/https://someone.medium.com/post-1",
                "title": "Post",
                "tags": "a,b"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 9 })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = delivery_for(&server, Some("https://freedium-mirror.cfd"))
            .deliver(&item("https://someone.medium.com/post-1"))
            .await;

        assert_eq!(outcome, DeliveryOutcome::Delivered);
    }
}
