use blockchain::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, ParsedTransaction, SimulationOutcome,
    SolanaClient, MAX_COMPUTE_UNITS, MAX_TRANSACTION_SIZE,
};
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::time::Duration;

/// A trimmed `getTransaction` response in `jsonParsed` encoding, as returned by a node.
fn rpc_response(signature: &str, payer: &str, wallet: &str, lamports: u64) -> serde_json::Value {
    json!({
        "blockTime": 1_700_000_000,
        "slot": 250_000_000,
        "meta": {
            "err": null,
            "fee": 5000,
            "preBalances": [20_000_000_000u64, 0, 1],
            "postBalances": [10_399_995_000u64, 9_600_000_000u64, 1],
            "innerInstructions": [],
            "logMessages": [
                "Program 11111111111111111111111111111111 invoke [1]",
                "Program 11111111111111111111111111111111 success"
            ],
            "status": { "Ok": null }
        },
        "transaction": {
            "signatures": [signature],
            "message": {
                "accountKeys": [
                    { "pubkey": payer, "signer": true, "writable": true },
                    { "pubkey": wallet, "signer": false, "writable": true },
                    { "pubkey": "11111111111111111111111111111111", "signer": false, "writable": false }
                ],
                "instructions": [
                    {
                        "program": "system",
                        "programId": "11111111111111111111111111111111",
                        "parsed": {
                            "type": "transfer",
                            "info": { "source": payer, "destination": wallet, "lamports": lamports }
                        }
                    },
                    {
                        "programId": "MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr",
                        "program": "spl-memo",
                        "parsed": "order 1234"
                    }
                ],
                "recentBlockhash": "EkSnNWid2cvwEVnVx9aBqawnmiCNiDgp3gUdkDPTKN1N"
            }
        },
        "version": 0
    })
}

#[test]
fn test_parses_node_transaction_response() {
    let payer = Pubkey::new_unique();
    let wallet = Pubkey::new_unique();
    let signature = Signature::new_unique();

    let raw = rpc_response(
        &signature.to_string(),
        &payer.to_string(),
        &wallet.to_string(),
        9_600_000_000,
    );
    let tx = ParsedTransaction::from_json_parsed(signature, &raw);

    assert_eq!(tx.signature, signature);
    assert!(!tx.failed());
    assert_eq!(tx.fee, 5000);
    assert_eq!(tx.transfers.len(), 1);
    assert_eq!(tx.lamports_to(&wallet), 9_600_000_000);
    assert_eq!(tx.sender_to(&wallet), Some(payer));
}

#[test]
fn test_missing_meta_is_tolerated() {
    let raw = json!({ "transaction": { "message": { "instructions": [] } } });
    let tx = ParsedTransaction::from_json_parsed(Signature::default(), &raw);
    assert!(!tx.failed());
    assert_eq!(tx.fee, 0);
    assert!(tx.transfers.is_empty());
}

#[test]
fn test_client_validates_addresses() {
    assert!(SolanaClient::validate_address("11111111111111111111111111111111").is_ok());
    assert!(SolanaClient::validate_address("not_a_valid_address").is_err());
}

#[test]
fn test_protocol_limits() {
    assert_eq!(MAX_TRANSACTION_SIZE, 1232);
    let outcome = SimulationOutcome {
        error: None,
        units_consumed: Some(MAX_COMPUTE_UNITS),
    };
    assert!(!outcome.exceeds_compute_limit());
}

#[tokio::test]
async fn test_circuit_breaker_blocks_while_open() {
    let breaker = CircuitBreaker::new(
        "primary-rpc-test",
        CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            timeout: Duration::from_millis(50),
        },
    );

    breaker.record_failure().await;
    breaker.record_failure().await;
    assert_eq!(breaker.state().await, CircuitState::Open);
    assert!(!breaker.is_request_allowed().await);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(breaker.is_request_allowed().await);
    breaker.record_success().await;
    assert_eq!(breaker.state().await, CircuitState::Closed);
}
