mod client;
mod types;

pub use self::{
    client::BlindsClient,
    types::{Ack, CommandKind, TelemetryRecord},
};

use crate::error::{CommandError, FetchError};
use async_trait::async_trait;

/// The two calls the blind service exposes.
///
/// Implementations never touch session state; interpreting the results is
/// left to the caller.
#[async_trait]
pub trait BlindsApi: Send + Sync {
    async fn fetch_telemetry(&self) -> Result<Vec<TelemetryRecord>, FetchError>;

    async fn send_command(&self, command: CommandKind) -> Result<Ack, CommandError>;
}
