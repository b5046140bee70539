use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;

use crate::error::SendError;
use crate::types::{RequestDefinition, JSON_CONTENT_TYPE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Performs a single request/response exchange.
#[async_trait]
pub trait RequestSender: Send + Sync {
    async fn send(&self, request: &RequestDefinition) -> Result<RawResponse, SendError>;
}

pub struct HttpSender {
    client: Client,
}

impl HttpSender {
    pub fn new(timeout: Duration) -> Result<Self, SendError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RequestSender for HttpSender {
    async fn send(&self, request: &RequestDefinition) -> Result<RawResponse, SendError> {
        let mut request_builder = self
            .client
            .request(request.method.to_reqwest(), &request.url);

        for (key, value) in &request.headers {
            request_builder = request_builder.header(key, value);
        }

        if request.method.sends_body() {
            let content_type = request.content_type.as_deref().unwrap_or(JSON_CONTENT_TYPE);
            request_builder = request_builder
                .header(CONTENT_TYPE, content_type)
                .body(request.body.clone().unwrap_or_default());
        }

        let response = request_builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(RawResponse { status, body })
    }
}
