use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::str::FromStr;

use crate::transaction::MAX_COMPUTE_UNITS;

/// A log notification for a watched address, as delivered by the subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub signature: Signature,
    /// Execution error reported alongside the logs, if any
    pub error: Option<String>,
}

/// A system-program transfer found in a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTransfer {
    pub source: Pubkey,
    pub destination: Pubkey,
    pub lamports: u64,
}

/// The parts of a confirmed transaction the forwarder cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTransaction {
    pub signature: Signature,
    pub error: Option<String>,
    pub fee: u64,
    pub transfers: Vec<ParsedTransfer>,
}

impl ParsedTransaction {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// Total lamports moved into `destination` by this transaction.
    pub fn lamports_to(&self, destination: &Pubkey) -> u64 {
        self.transfers
            .iter()
            .filter(|t| &t.destination == destination)
            .fold(0u64, |acc, t| acc.saturating_add(t.lamports))
    }

    /// Source of the first transfer into `destination`.
    pub fn sender_to(&self, destination: &Pubkey) -> Option<Pubkey> {
        self.transfers
            .iter()
            .find(|t| &t.destination == destination)
            .map(|t| t.source)
    }

    /// Build from a `getTransaction` result fetched with `jsonParsed` encoding.
    ///
    /// Top-level and inner instructions are both scanned, so transfers made
    /// through another program still count.
    pub fn from_json_parsed(signature: Signature, raw: &Value) -> Self {
        let meta = raw.get("meta");
        let error = meta
            .and_then(|m| m.get("err"))
            .filter(|e| !e.is_null())
            .map(|e| e.to_string());
        let fee = meta.and_then(|m| m.get("fee")).and_then(Value::as_u64).unwrap_or(0);

        let mut transfers = Vec::new();

        let top_level = raw
            .pointer("/transaction/message/instructions")
            .and_then(Value::as_array);
        for ix in top_level.into_iter().flatten() {
            transfers.extend(parse_transfer_instruction(ix));
        }

        let inner = meta
            .and_then(|m| m.get("innerInstructions"))
            .and_then(Value::as_array);
        for group in inner.into_iter().flatten() {
            let instructions = group.get("instructions").and_then(Value::as_array);
            for ix in instructions.into_iter().flatten() {
                transfers.extend(parse_transfer_instruction(ix));
            }
        }

        Self {
            signature,
            error,
            fee,
            transfers,
        }
    }
}

/// Parse one `jsonParsed` instruction into a transfer, if it is a system transfer.
pub fn parse_transfer_instruction(ix: &Value) -> Option<ParsedTransfer> {
    if ix.get("program").and_then(Value::as_str) != Some("system") {
        return None;
    }

    let parsed = ix.get("parsed")?;
    match parsed.get("type").and_then(Value::as_str)? {
        "transfer" | "transferWithSeed" => {}
        _ => return None,
    }

    let info = parsed.get("info")?;
    let source = Pubkey::from_str(info.get("source")?.as_str()?).ok()?;
    let destination = Pubkey::from_str(info.get("destination")?.as_str()?).ok()?;
    let lamports = info.get("lamports")?.as_u64()?;

    Some(ParsedTransfer {
        source,
        destination,
        lamports,
    })
}

/// Result of a transaction simulation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationOutcome {
    pub error: Option<String>,
    pub units_consumed: Option<u64>,
}

impl SimulationOutcome {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn exceeds_compute_limit(&self) -> bool {
        self.units_consumed.map_or(false, |u| u > MAX_COMPUTE_UNITS)
    }
}
