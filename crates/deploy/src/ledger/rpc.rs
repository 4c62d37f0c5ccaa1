//! JSON-RPC ledger.
//!
//! Operations are sent with `eth_sendTransaction` from an account the node
//! holds the key for (Anvil, Hardhat node, a dev node with an unlocked
//! deployer). Receipts are polled with `eth_getTransactionReceipt`.

use std::time::Duration;

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, Bytes},
};
use anyhow::Context;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use url::Url;

use super::{Ledger, LedgerRequest, PendingHandle, Receipt, encode_call};
use crate::{
    artifacts::ArtifactStore,
    error::Result,
    namehash::NodeId,
    rpc::{self, deserialize_u64_from_hex},
};

/// Default interval between two receipt polls.
pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Maximum retries of a single read request on transport errors.
const READ_RETRIES: usize = 3;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: B256,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    block_number: u64,
    #[serde(deserialize_with = "deserialize_u64_from_hex")]
    status: u64,
    contract_address: Option<Address>,
}

impl From<RawReceipt> for Receipt {
    fn from(raw: RawReceipt) -> Self {
        Self {
            tx_hash: raw.transaction_hash,
            block_number: raw.block_number,
            success: raw.status == 1,
            contract_address: raw.contract_address,
            revert_reason: (raw.status != 1).then(|| "transaction reverted".to_string()),
        }
    }
}

/// [`Ledger`] backed by an Ethereum JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcLedger {
    client: reqwest::Client,
    url: Url,
    deployer: Address,
    artifacts: ArtifactStore,
    poll_interval: Duration,
}

impl RpcLedger {
    pub fn new(url: Url, deployer: Address, artifacts: ArtifactStore) -> anyhow::Result<Self> {
        Ok(Self {
            client: rpc::create_client(rpc::DEFAULT_TIMEOUT)?,
            url,
            deployer,
            artifacts,
            poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
        })
    }

    /// Set the interval between receipt polls.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Chain ID reported by the node.
    pub async fn chain_id(&self) -> Result<u64> {
        let chain_id: String = self.read("eth_chainId", vec![]).await?;
        let chain_id = u64::from_str_radix(chain_id.trim_start_matches("0x"), 16)
            .with_context(|| format!("Invalid chain id returned by the node: {chain_id}"))?;
        Ok(chain_id)
    }

    /// Idempotent read, retried on transport errors.
    async fn read<T: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> anyhow::Result<T> {
        let client = &self.client;
        let url = self.url.as_str();
        let params = &params;
        let fetch = move || async move {
            rpc::json_rpc_call::<T>(client, url, method, params.clone()).await
        };

        fetch
            .retry(ExponentialBuilder::default().with_max_times(READ_RETRIES))
            .notify(|err, after| {
                tracing::debug!(method, error = %err, retry_in = ?after, "RPC read failed, retrying...");
            })
            .await
    }

    fn creation_data(&self, request: &super::CreateRequest) -> Result<Bytes> {
        let artifact = self.artifacts.load(&request.contract)?;
        let mut data = artifact.link(&request.libraries)?.to_vec();
        if !request.args.is_empty() {
            data.extend(DynSolValue::Tuple(request.args.clone()).abi_encode_params());
        }
        Ok(data.into())
    }
}

impl Ledger for RpcLedger {
    fn deployer(&self) -> Address {
        self.deployer
    }

    async fn submit(&self, request: LedgerRequest) -> Result<PendingHandle> {
        let (tx, description) = match &request {
            LedgerRequest::Create(create) => (
                json!({ "from": self.deployer, "data": self.creation_data(create)? }),
                format!("creation of {}", create.name),
            ),
            LedgerRequest::Call(call) => (
                json!({
                    "from": self.deployer,
                    "to": call.to,
                    "data": Bytes::from(call.call.abi_encode()),
                }),
                format!("{} on {}", call.call.name(), call.to),
            ),
        };

        // Not retried: a duplicate submission could create a second contract.
        let tx_hash: B256 = rpc::json_rpc_call(
            &self.client,
            self.url.as_str(),
            "eth_sendTransaction",
            vec![tx],
        )
        .await
        .with_context(|| format!("Failed to submit {description}"))?;

        tracing::debug!(tx_hash = %tx_hash, %description, "Transaction submitted");
        Ok(PendingHandle { tx_hash })
    }

    async fn await_confirmation(&self, handle: PendingHandle) -> Result<Receipt> {
        loop {
            let receipt: Option<RawReceipt> = self
                .read("eth_getTransactionReceipt", vec![json!(handle.tx_hash)])
                .await
                .with_context(|| format!("Failed to fetch receipt of {}", handle.tx_hash))?;

            if let Some(receipt) = receipt {
                return Ok(receipt.into());
            }

            tracing::trace!(tx_hash = %handle.tx_hash, "Transaction pending, polling again...");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn owner(&self, registry: Address, node: NodeId) -> Result<Address> {
        let data = encode_call("owner(bytes32)", vec![DynSolValue::FixedBytes(node, 32)]);
        let output: Bytes = self
            .read(
                "eth_call",
                vec![
                    json!({ "to": registry, "data": Bytes::from(data) }),
                    json!("latest"),
                ],
            )
            .await
            .with_context(|| format!("Failed to read owner of {node}"))?;

        let word = output
            .get(..32)
            .context("owner(bytes32) returned less than one word")?;
        Ok(Address::from_word(B256::from_slice(word)))
    }
}
