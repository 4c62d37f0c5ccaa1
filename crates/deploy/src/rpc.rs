//! Minimal Ethereum JSON-RPC transport.

use std::{fmt, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

/// Default timeout for RPC requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Vec<Value>,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct Response<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

/// Error object returned by the node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    /// Revert data, when the node provides it.
    #[serde(default)]
    pub data: Option<Value>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)?;
        if let Some(data) = &self.data {
            write!(f, " ({data})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Call `method` and deserialize its result.
///
/// A `null` result is passed to `T` as is, so pending lookups can use `Option<_>`.
pub async fn json_rpc_call<T: DeserializeOwned + Send>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> anyhow::Result<T> {
    let request = Request {
        jsonrpc: "2.0",
        method,
        params,
        id: 1,
    };

    let response: Response<Value> = client
        .post(url)
        .json(&request)
        .send()
        .await
        .with_context(|| format!("Failed to send {method} request"))?
        .json()
        .await
        .with_context(|| format!("Failed to parse {method} response"))?;

    decode(method, response)
}

fn decode<T: DeserializeOwned>(method: &str, response: Response<Value>) -> anyhow::Result<T> {
    if let Some(error) = response.error {
        return Err(anyhow::Error::new(error).context(format!("{method} failed")));
    }

    serde_json::from_value(response.result.unwrap_or(Value::Null))
        .with_context(|| format!("Failed to deserialize {method} result"))
}

/// Deserialize a hex quantity (`0x`-prefixed) into a `u64`.
pub fn deserialize_u64_from_hex<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let quantity = String::deserialize(deserializer)?;
    u64::from_str_radix(quantity.trim_start_matches("0x"), 16).map_err(serde::de::Error::custom)
}
