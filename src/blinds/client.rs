use super::{
    types::{Ack, CommandKind, ControlRequest, TelemetryRecord},
    BlindsApi,
};
use crate::error::{BlindControlError, CommandError, FetchError, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::*;

const TELEMETRY_PATH: &str = "blinds";
const CONTROL_PATH: &str = "blinds/control";

/// HTTP client for the blind service.
///
/// No request timeout is configured, calls wait as long as the transport does.
#[derive(Debug, Clone)]
pub struct BlindsClient {
    http_client: Client,
    base_url: String,
}

impl BlindsClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Url::parse(base_url).map_err(|_| BlindControlError::InvalidBaseUrl(base_url.to_owned()))?;
        let http_client = Client::builder().build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl BlindsApi for BlindsClient {
    #[instrument(skip(self))]
    async fn fetch_telemetry(&self) -> std::result::Result<Vec<TelemetryRecord>, FetchError> {
        let url = self.endpoint(TELEMETRY_PATH);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await?
            .error_for_status()?;
        // decode separately so a bad body is reported as such and not as a transport error
        let body = response.bytes().await?;
        let records: Vec<TelemetryRecord> = serde_json::from_slice(&body)?;
        debug!("Fetched {} telemetry records", records.len());
        Ok(records)
    }

    #[instrument(skip(self))]
    async fn send_command(&self, command: CommandKind) -> std::result::Result<Ack, CommandError> {
        let url = self.endpoint(CONTROL_PATH);
        let response = self
            .http_client
            .post(&url)
            .json(&ControlRequest { command })
            .send()
            .await?
            .error_for_status()?;
        let status = response.status();
        let body = response.text().await?;
        info!("Command {} accepted with {}", command, status);
        Ok(Ack { status, body })
    }
}
