//! Ledger access layer.
//!
//! The pipeline consumes an abstract [`LedgerReader`]; the production
//! implementation wraps the nonblocking Solana RPC client and decodes
//! reward-pool instruction data into named kinds so the decoder never
//! touches wire bytes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use borsh::BorshDeserialize;
use serde_json::{json, Value};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::{EncodedTransaction, UiMessage, UiTransactionEncoding};

/// One signature entry as returned by the ledger, most recent first.
#[derive(Debug, Clone)]
pub struct SignatureRecord {
    pub signature: String,
    pub slot: u64,
    pub err: Option<String>,
    pub block_time: Option<i64>,
}

/// A single instruction with its data already decoded into a named
/// kind and JSON field payload.
#[derive(Debug, Clone)]
pub struct ParsedInstruction {
    pub program_id: String,
    pub kind: String,
    pub fields: Value,
    pub accounts: Vec<String>,
}

/// A fetched transaction in the shape the decoder consumes.
#[derive(Debug, Clone)]
pub struct ParsedTransaction {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub account_keys: Vec<String>,
    pub instructions: Vec<ParsedInstruction>,
    /// Lamport balances per account before/after execution.
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    /// Ledger-level execution error, if the transaction failed.
    pub err: Option<String>,
}

/// Read-side capability the pipeline consumes. Implemented over RPC in
/// production and in-memory in tests.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    async fn current_height(&self) -> Result<u64>;

    /// Signatures involving `address` newer than `since_cursor`,
    /// most recent first.
    async fn signatures_for_address(
        &self,
        address: &str,
        since_cursor: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SignatureRecord>>;

    /// `Ok(None)` means the ledger has no usable transaction for the
    /// signature; `Err` is a transport failure.
    async fn parsed_transaction(&self, signature: &str) -> Result<Option<ParsedTransaction>>;

    // Health probes.
    async fn node_version(&self) -> Result<String>;
    async fn cluster_peer_count(&self) -> Result<usize>;
    async fn account_exists(&self, address: &str) -> Result<bool>;
}

/// Reward-pool instruction layout, mirroring the on-chain program.
#[derive(Debug, BorshDeserialize)]
enum RewardPoolInstruction {
    InitializeRewardPool { platform_fee_percentage: u8 },
    RecordTaskCompletion {
        task_id: String,
        pool_id: String,
        reward_amount: u64,
    },
    WithdrawRewards {
        task_ids: Vec<String>,
        expected_nonce: u64,
    },
    SetPaused { is_paused: bool },
    UpdatePlatformFee { new_fee_percentage: u8 },
    CreateRewardVault,
}

/// Decode raw instruction data into a named kind plus JSON fields.
/// Undecodable data yields a synthetic `unknown(..)` kind so the
/// instruction still flows through the pipeline instead of vanishing.
pub fn decode_instruction_data(data: &[u8]) -> (String, Value) {
    match RewardPoolInstruction::try_from_slice(data) {
        Ok(RewardPoolInstruction::InitializeRewardPool { platform_fee_percentage }) => (
            "initializeRewardPool".to_string(),
            json!({ "platformFeePercentage": platform_fee_percentage }),
        ),
        Ok(RewardPoolInstruction::RecordTaskCompletion { task_id, pool_id, reward_amount }) => (
            "recordTaskCompletion".to_string(),
            json!({ "taskId": task_id, "poolId": pool_id, "rewardAmount": reward_amount }),
        ),
        Ok(RewardPoolInstruction::WithdrawRewards { task_ids, expected_nonce }) => (
            "withdrawRewards".to_string(),
            json!({ "taskIds": task_ids, "expectedNonce": expected_nonce }),
        ),
        Ok(RewardPoolInstruction::SetPaused { is_paused }) => {
            ("setPaused".to_string(), json!({ "isPaused": is_paused }))
        }
        Ok(RewardPoolInstruction::UpdatePlatformFee { new_fee_percentage }) => (
            "updatePlatformFee".to_string(),
            json!({ "newFeePercentage": new_fee_percentage }),
        ),
        Ok(RewardPoolInstruction::CreateRewardVault) => {
            ("createRewardVault".to_string(), json!({}))
        }
        Err(_) => {
            let tag = data
                .first()
                .map(|b| format!("unknown({})", b))
                .unwrap_or_else(|| "unknown(empty)".to_string());
            (tag, json!({}))
        }
    }
}

/// Production reader backed by the Solana JSON-RPC API.
pub struct RpcLedgerReader {
    client: RpcClient,
    commitment: CommitmentConfig,
}

impl RpcLedgerReader {
    pub fn new(rpc_url: impl Into<String>, commitment: CommitmentConfig) -> Self {
        Self {
            client: RpcClient::new_with_commitment(rpc_url.into(), commitment),
            commitment,
        }
    }
}

#[async_trait]
impl LedgerReader for RpcLedgerReader {
    async fn current_height(&self) -> Result<u64> {
        self.client.get_slot().await.context("Failed to fetch current slot")
    }

    async fn signatures_for_address(
        &self,
        address: &str,
        since_cursor: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SignatureRecord>> {
        let pubkey: Pubkey = address.parse().context("Invalid watched address")?;
        let until = since_cursor
            .map(|s| s.parse::<Signature>())
            .transpose()
            .context("Invalid cursor signature")?;

        let config = GetConfirmedSignaturesForAddress2Config {
            before: None,
            until,
            limit: Some(limit),
            commitment: Some(self.commitment),
        };

        let records = self
            .client
            .get_signatures_for_address_with_config(&pubkey, config)
            .await
            .context("Failed to fetch signatures")?;

        Ok(records
            .into_iter()
            .map(|r| SignatureRecord {
                signature: r.signature,
                slot: r.slot,
                err: r.err.map(|e| e.to_string()),
                block_time: r.block_time,
            })
            .collect())
    }

    async fn parsed_transaction(&self, signature: &str) -> Result<Option<ParsedTransaction>> {
        let sig: Signature = signature.parse().context("Invalid signature")?;

        let tx = self
            .client
            .get_transaction_with_config(
                &sig,
                RpcTransactionConfig {
                    encoding: Some(UiTransactionEncoding::Json),
                    commitment: Some(self.commitment),
                    max_supported_transaction_version: Some(0),
                },
            )
            .await
            .context("Failed to fetch transaction")?;

        let slot = tx.slot;
        let block_time = tx.block_time;

        let ui_tx = match tx.transaction.transaction {
            EncodedTransaction::Json(ui_tx) => ui_tx,
            _ => return Ok(None),
        };

        let message = match ui_tx.message {
            UiMessage::Raw(raw) => raw,
            UiMessage::Parsed(_) => return Ok(None),
        };

        let account_keys = message.account_keys;
        let instructions = message
            .instructions
            .iter()
            .map(|ix| {
                let program_id = account_keys
                    .get(ix.program_id_index as usize)
                    .cloned()
                    .unwrap_or_default();
                let accounts = ix
                    .accounts
                    .iter()
                    .filter_map(|idx| account_keys.get(*idx as usize).cloned())
                    .collect();
                let data = bs58::decode(&ix.data).into_vec().unwrap_or_default();
                let (kind, fields) = decode_instruction_data(&data);
                ParsedInstruction {
                    program_id,
                    kind,
                    fields,
                    accounts,
                }
            })
            .collect();

        let (pre_balances, post_balances, err) = match tx.transaction.meta {
            Some(meta) => (
                meta.pre_balances,
                meta.post_balances,
                meta.err.map(|e| e.to_string()),
            ),
            None => (Vec::new(), Vec::new(), None),
        };

        Ok(Some(ParsedTransaction {
            signature: signature.to_string(),
            slot,
            block_time,
            account_keys,
            instructions,
            pre_balances,
            post_balances,
            err,
        }))
    }

    async fn node_version(&self) -> Result<String> {
        let version = self
            .client
            .get_version()
            .await
            .context("Failed to fetch node version")?;
        Ok(version.solana_core)
    }

    async fn cluster_peer_count(&self) -> Result<usize> {
        let nodes = self
            .client
            .get_cluster_nodes()
            .await
            .context("Failed to fetch cluster nodes")?;
        Ok(nodes.len())
    }

    async fn account_exists(&self, address: &str) -> Result<bool> {
        let pubkey: Pubkey = address.parse().context("Invalid account address")?;
        let response = self
            .client
            .get_account_with_commitment(&pubkey, self.commitment)
            .await
            .context("Failed to fetch account")?;
        Ok(response.value.is_some())
    }
}

/// Parse a commitment level string from configuration.
pub fn parse_commitment(level: &str) -> CommitmentConfig {
    match level {
        "processed" => CommitmentConfig::processed(),
        "finalized" => CommitmentConfig::finalized(),
        _ => CommitmentConfig::confirmed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use borsh::BorshSerialize;

    #[derive(BorshSerialize)]
    enum TestInstruction {
        InitializeRewardPool { platform_fee_percentage: u8 },
        RecordTaskCompletion {
            task_id: String,
            pool_id: String,
            reward_amount: u64,
        },
    }

    #[test]
    fn test_decode_initialize() {
        let mut data = Vec::new();
        TestInstruction::InitializeRewardPool { platform_fee_percentage: 10 }
            .serialize(&mut data)
            .unwrap();

        let (kind, fields) = decode_instruction_data(&data);
        assert_eq!(kind, "initializeRewardPool");
        assert_eq!(fields["platformFeePercentage"], 10);
    }

    #[test]
    fn test_decode_record_completion() {
        let mut data = Vec::new();
        TestInstruction::RecordTaskCompletion {
            task_id: "task-1".to_string(),
            pool_id: "pool-1".to_string(),
            reward_amount: 500,
        }
        .serialize(&mut data)
        .unwrap();

        let (kind, fields) = decode_instruction_data(&data);
        assert_eq!(kind, "recordTaskCompletion");
        assert_eq!(fields["taskId"], "task-1");
        assert_eq!(fields["rewardAmount"], 500);
    }

    #[test]
    fn test_decode_unknown_discriminant() {
        let (kind, _) = decode_instruction_data(&[42, 0, 0]);
        assert_eq!(kind, "unknown(42)");

        let (kind, _) = decode_instruction_data(&[]);
        assert_eq!(kind, "unknown(empty)");
    }

    #[test]
    fn test_parse_commitment_levels() {
        assert_eq!(parse_commitment("processed"), CommitmentConfig::processed());
        assert_eq!(parse_commitment("finalized"), CommitmentConfig::finalized());
        assert_eq!(parse_commitment("confirmed"), CommitmentConfig::confirmed());
        assert_eq!(parse_commitment("other"), CommitmentConfig::confirmed());
    }
}
