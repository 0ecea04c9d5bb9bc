//! Decodes parsed transactions into typed domain events.
//!
//! Instruction kinds map 1:1 onto event kinds; anything outside the
//! closed mapping becomes a contract-error event rather than being
//! dropped. Balance-change and suspicious-activity events are derived
//! from transaction metadata independently of instruction decoding.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::config::MonitorSettings;
use crate::ledger::{ParsedInstruction, ParsedTransaction};
use crate::models::{EventKind, ProgramEvent, Severity};

pub struct EventDecoder {
    program_id: String,
    balance_monitoring: bool,
    suspicious_activity_detection: bool,
    low_balance_threshold: u64,
    high_volume_threshold: u64,
}

impl EventDecoder {
    pub fn new(program_id: impl Into<String>, settings: &MonitorSettings) -> Self {
        Self {
            program_id: program_id.into(),
            balance_monitoring: settings.balance_monitoring,
            suspicious_activity_detection: settings.suspicious_activity_detection,
            low_balance_threshold: settings.low_balance_threshold,
            high_volume_threshold: settings.high_volume_threshold,
        }
    }

    /// Decode a transaction into zero or more events, in instruction
    /// order followed by derived balance/suspicious events.
    pub fn decode(&self, tx: &ParsedTransaction) -> Vec<ProgramEvent> {
        let timestamp = block_timestamp(tx.block_time);
        let mut events = Vec::new();

        for instruction in &tx.instructions {
            if instruction.program_id != self.program_id {
                continue;
            }
            // One bad instruction must not stop the rest of the
            // transaction from decoding.
            events.push(self.decode_instruction(tx, instruction, timestamp));
        }

        if self.balance_monitoring {
            self.decode_balance_changes(tx, timestamp, &mut events);
        }

        if self.suspicious_activity_detection {
            if let Some(err) = &tx.err {
                let mut event = ProgramEvent::new(
                    EventKind::SuspiciousActivity,
                    tx.signature.clone(),
                    tx.slot,
                    Severity::High,
                );
                event.timestamp = timestamp;
                event.error = Some(err.clone());
                event.address = tx.account_keys.first().cloned();
                events.push(event);
            }
        }

        events
    }

    fn decode_instruction(
        &self,
        tx: &ParsedTransaction,
        instruction: &ParsedInstruction,
        timestamp: DateTime<Utc>,
    ) -> ProgramEvent {
        let fields = &instruction.fields;
        let fee_payer = tx.account_keys.first().cloned();

        let (kind, severity) = match instruction.kind.as_str() {
            "initializeRewardPool" => (EventKind::RewardPoolInitialized, Severity::Medium),
            "recordTaskCompletion" => (EventKind::TaskCompletionRecorded, Severity::Low),
            "withdrawRewards" => (EventKind::RewardsWithdrawn, Severity::Medium),
            "setPaused" => {
                if fields.get("isPaused").and_then(Value::as_bool).unwrap_or(false) {
                    (EventKind::PoolPaused, Severity::High)
                } else {
                    (EventKind::PoolUnpaused, Severity::Medium)
                }
            }
            "updatePlatformFee" => (EventKind::PlatformFeeUpdated, Severity::Medium),
            "createRewardVault" => (EventKind::RewardVaultCreated, Severity::Low),
            unknown => {
                tracing::warn!(
                    signature = %tx.signature,
                    kind = %unknown,
                    "Unknown instruction kind, emitting contract-error"
                );
                let mut event = ProgramEvent::new(
                    EventKind::ContractError,
                    tx.signature.clone(),
                    tx.slot,
                    Severity::High,
                );
                event.timestamp = timestamp;
                event.error = Some(format!("Unknown instruction kind: {}", unknown));
                event.address = fee_payer;
                return event;
            }
        };

        let mut event = ProgramEvent::new(kind, tx.signature.clone(), tx.slot, severity);
        event.timestamp = timestamp;
        event.address = fee_payer;
        event.task_id = fields
            .get("taskId")
            .and_then(Value::as_str)
            .map(str::to_string);
        event.pool_id = fields
            .get("poolId")
            .and_then(Value::as_str)
            .map(str::to_string);
        event.amount = fields.get("rewardAmount").and_then(Value::as_f64);

        if kind == EventKind::RewardVaultCreated {
            // The vault instruction carries the mint as its first account.
            event.token_mint = instruction.accounts.first().cloned();
        }

        if let Some(object) = fields.as_object() {
            for (key, value) in object {
                event.metadata.insert(key.clone(), value.clone());
            }
        }

        event
    }

    fn decode_balance_changes(
        &self,
        tx: &ParsedTransaction,
        timestamp: DateTime<Utc>,
        events: &mut Vec<ProgramEvent>,
    ) {
        for (index, (pre, post)) in tx
            .pre_balances
            .iter()
            .zip(tx.post_balances.iter())
            .enumerate()
        {
            let address = tx.account_keys.get(index).cloned();

            if *post < self.low_balance_threshold {
                let mut event = ProgramEvent::new(
                    EventKind::BalanceLow,
                    tx.signature.clone(),
                    tx.slot,
                    Severity::High,
                );
                event.timestamp = timestamp;
                event.address = address.clone();
                event.amount = Some(*post as f64);
                event
                    .metadata
                    .insert("preBalance".to_string(), Value::from(*pre));
                event
                    .metadata
                    .insert("postBalance".to_string(), Value::from(*post));
                events.push(event);
            }

            let delta = post.abs_diff(*pre);
            if delta > self.high_volume_threshold {
                let mut event = ProgramEvent::new(
                    EventKind::HighVolume,
                    tx.signature.clone(),
                    tx.slot,
                    Severity::Medium,
                );
                event.timestamp = timestamp;
                event.address = address;
                event.amount = Some(delta as f64);
                event
                    .metadata
                    .insert("preBalance".to_string(), Value::from(*pre));
                event
                    .metadata
                    .insert("postBalance".to_string(), Value::from(*post));
                events.push(event);
            }
        }
    }
}

fn block_timestamp(block_time: Option<i64>) -> DateTime<Utc> {
    block_time
        .and_then(|t| Utc.timestamp_opt(t, 0).single())
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PROGRAM: &str = "Fg6PaFpoGXkYsidMpWTK6W2BeZ7FEfcYkg476zPFsLnS";

    fn decoder() -> EventDecoder {
        EventDecoder::new(PROGRAM, &MonitorSettings::default())
    }

    fn tx_with_instructions(instructions: Vec<ParsedInstruction>) -> ParsedTransaction {
        ParsedTransaction {
            signature: "sig1".to_string(),
            slot: 100,
            block_time: Some(1_700_000_000),
            account_keys: vec!["payer".to_string(), "pool".to_string()],
            instructions,
            pre_balances: vec![],
            post_balances: vec![],
            err: None,
        }
    }

    fn instruction(kind: &str, fields: Value) -> ParsedInstruction {
        ParsedInstruction {
            program_id: PROGRAM.to_string(),
            kind: kind.to_string(),
            fields,
            accounts: vec!["pool".to_string()],
        }
    }

    #[test]
    fn test_record_completion_maps_to_event() {
        let tx = tx_with_instructions(vec![instruction(
            "recordTaskCompletion",
            json!({"taskId": "t-1", "poolId": "p-1", "rewardAmount": 500}),
        )]);

        let events = decoder().decode(&tx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::TaskCompletionRecorded);
        assert_eq!(events[0].task_id.as_deref(), Some("t-1"));
        assert_eq!(events[0].pool_id.as_deref(), Some("p-1"));
        assert_eq!(events[0].amount, Some(500.0));
    }

    #[test]
    fn test_set_paused_splits_on_flag() {
        let paused = tx_with_instructions(vec![instruction("setPaused", json!({"isPaused": true}))]);
        let unpaused =
            tx_with_instructions(vec![instruction("setPaused", json!({"isPaused": false}))]);

        assert_eq!(decoder().decode(&paused)[0].kind, EventKind::PoolPaused);
        assert_eq!(decoder().decode(&unpaused)[0].kind, EventKind::PoolUnpaused);
    }

    #[test]
    fn test_unknown_instruction_yields_contract_error_and_continues() {
        let tx = tx_with_instructions(vec![
            instruction("unknown(9)", json!({})),
            instruction("setPaused", json!({"isPaused": true})),
        ]);

        let events = decoder().decode(&tx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::ContractError);
        assert!(events[0].error.as_deref().unwrap().contains("unknown(9)"));
        assert_eq!(events[1].kind, EventKind::PoolPaused);
    }

    #[test]
    fn test_foreign_program_instructions_ignored() {
        let mut other = instruction("setPaused", json!({"isPaused": true}));
        other.program_id = "SomeOtherProgram11111111111111111111111111111".to_string();
        let tx = tx_with_instructions(vec![other]);

        assert!(decoder().decode(&tx).is_empty());
    }

    #[test]
    fn test_balance_low_and_high_volume() {
        let mut tx = tx_with_instructions(vec![]);
        tx.pre_balances = vec![200_000_000, 50_000_000_000];
        tx.post_balances = vec![50_000_000, 30_000_000_000];

        let events = decoder().decode(&tx);
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&EventKind::BalanceLow));
        assert!(kinds.contains(&EventKind::HighVolume));

        let low = events.iter().find(|e| e.kind == EventKind::BalanceLow).unwrap();
        assert_eq!(low.address.as_deref(), Some("payer"));
        assert_eq!(low.amount, Some(50_000_000.0));
    }

    #[test]
    fn test_failed_transaction_emits_suspicious_activity() {
        let mut tx = tx_with_instructions(vec![]);
        tx.err = Some("InstructionError(0, Custom(3))".to_string());

        let events = decoder().decode(&tx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::SuspiciousActivity);
        assert!(events[0].error.as_deref().unwrap().contains("Custom(3)"));
    }

    #[test]
    fn test_detection_toggles_disable_derived_events() {
        let settings = MonitorSettings {
            balance_monitoring: false,
            suspicious_activity_detection: false,
            ..Default::default()
        };
        let decoder = EventDecoder::new(PROGRAM, &settings);

        let mut tx = tx_with_instructions(vec![]);
        tx.pre_balances = vec![200_000_000];
        tx.post_balances = vec![10];
        tx.err = Some("failed".to_string());

        assert!(decoder.decode(&tx).is_empty());
    }
}
