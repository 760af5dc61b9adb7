use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use shared::config::SolanaConfig;
use shared::{Error, Result};
use solana_client::client_error::ClientErrorKind;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{
    RpcSendTransactionConfig, RpcTransactionConfig, RpcTransactionLogsConfig,
    RpcTransactionLogsFilter,
};
use solana_client::rpc_request::RpcRequest;
use solana_sdk::{
    commitment_config::CommitmentConfig, hash::Hash, message::Message, pubkey::Pubkey,
    signature::Signature, transaction::Transaction,
};
use solana_transaction_status::UiTransactionEncoding;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::gateway::{LedgerGateway, LogSubscription, SubmitOptions};
use crate::rate_limiter::RpcRateLimiter;
use crate::retry::{retry_with_backoff_if, RetryConfig};
use crate::types::{LogEvent, ParsedTransaction, SimulationOutcome};

const SUBSCRIPTION_BUFFER: usize = 32;
const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_millis(500);
const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);

struct Endpoint {
    rpc: Arc<RpcClient>,
    breaker: CircuitBreaker,
}

impl Endpoint {
    fn new(label: &str, url: &str, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            rpc: Arc::new(RpcClient::new_with_commitment(
                url.to_string(),
                CommitmentConfig::confirmed(),
            )),
            breaker: CircuitBreaker::new(format!("{}-rpc-{}", label, url), breaker_config),
        }
    }
}

/// Solana node access for the forwarder.
///
/// Reads go through the shared rate limiter, are retried with backoff and
/// fall back to the secondary endpoint when the primary keeps failing.
/// Submissions are sent exactly once to the primary.
pub struct SolanaClient {
    primary: Endpoint,
    fallback: Option<Endpoint>,
    pubsub: Arc<PubsubClient>,
    limiter: RpcRateLimiter,
    retry_config: RetryConfig,
}

impl SolanaClient {
    /// Connect the RPC clients and the websocket used for log subscriptions.
    pub async fn connect(config: &SolanaConfig) -> Result<Self> {
        Self::connect_with(config, RetryConfig::default(), CircuitBreakerConfig::default()).await
    }

    pub async fn connect_with(
        config: &SolanaConfig,
        retry_config: RetryConfig,
        breaker_config: CircuitBreakerConfig,
    ) -> Result<Self> {
        info!("Initializing Solana client with primary RPC: {}", config.rpc_url);

        let primary = Endpoint::new("primary", &config.rpc_url, breaker_config.clone());
        let fallback = config.rpc_fallback_url.as_deref().map(|url| {
            info!("Configuring fallback RPC: {}", url);
            Endpoint::new("fallback", url, breaker_config)
        });

        let pubsub = PubsubClient::new(&config.ws_url)
            .await
            .map_err(|e| Error::Subscription(format!("websocket connect to {} failed: {}", config.ws_url, e)))?;

        Ok(Self {
            primary,
            fallback,
            pubsub: Arc::new(pubsub),
            limiter: RpcRateLimiter::new(config.ratelimit_every, config.ratelimit_burst),
            retry_config,
        })
    }

    /// Validate a Solana wallet address format
    pub fn validate_address(address: &str) -> Result<Pubkey> {
        Pubkey::from_str(address).map_err(|e| {
            warn!("Invalid wallet address format: {} - {}", address, e);
            Error::InvalidWalletAddress(format!("Invalid Solana address format: {}", e))
        })
    }

    /// Connectivity check against the primary node.
    pub async fn health_check(&self) -> Result<()> {
        self.latest_blockhash().await.map(|_| ())
    }

    async fn run_on<F, Fut, T>(
        &self,
        endpoint: &Endpoint,
        operation_name: &str,
        retry_config: &RetryConfig,
        operation: &F,
    ) -> Result<T>
    where
        F: Fn(Arc<RpcClient>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !endpoint.breaker.is_request_allowed().await {
            error!(
                "Circuit breaker '{}' is open for operation: {}",
                endpoint.breaker.name(),
                operation_name
            );
            return Err(Error::CircuitBreakerOpen(format!(
                "Circuit breaker is open for {}",
                operation_name
            )));
        }

        let limiter = &self.limiter;
        let result = retry_with_backoff_if(
            operation_name,
            retry_config,
            || {
                let rpc = endpoint.rpc.clone();
                async move {
                    limiter.acquire().await;
                    operation(rpc).await
                }
            },
            Error::is_transport,
        )
        .await;

        match &result {
            Ok(_) => endpoint.breaker.record_success().await,
            Err(_) => endpoint.breaker.record_failure().await,
        }
        result
    }

    /// Poll the signature status until the node reports it at `commitment`.
    async fn await_confirmation(&self, signature: &Signature, commitment: CommitmentConfig) -> Result<()> {
        let deadline = Instant::now() + CONFIRMATION_TIMEOUT;
        let signature = *signature;

        loop {
            let status = self
                .read("get_signature_status", move |rpc| async move {
                    rpc.get_signature_status_with_commitment(&signature, commitment)
                        .await
                        .map_err(|e| Error::SolanaRpc(format!("get_signature_status failed: {}", e)))
                })
                .await?;

            match status {
                Some(Ok(())) => {
                    debug!("Transaction {} confirmed", signature);
                    return Ok(());
                }
                Some(Err(e)) => {
                    return Err(Error::TransactionFailed(format!(
                        "transaction {} failed on chain: {}",
                        signature, e
                    )));
                }
                None if Instant::now() >= deadline => {
                    return Err(Error::Timeout(format!(
                        "transaction {} not confirmed within {:?}",
                        signature, CONFIRMATION_TIMEOUT
                    )));
                }
                None => tokio::time::sleep(CONFIRMATION_POLL_INTERVAL).await,
            }
        }
    }

    /// Idempotent read: retried on the primary, then tried on the fallback.
    async fn read<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: Fn(Arc<RpcClient>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let primary = self
            .run_on(&self.primary, operation_name, &self.retry_config, &operation)
            .await;

        match (primary, &self.fallback) {
            (Ok(value), _) => Ok(value),
            (Err(e), Some(fallback)) if e.is_transport() => {
                warn!("Primary RPC failed for {}: {}", operation_name, e);
                debug!("Attempting fallback RPC for {}", operation_name);
                self.run_on(fallback, operation_name, &self.retry_config, &operation)
                    .await
                    .map_err(|fallback_err| {
                        error!("Both primary and fallback RPC failed: {}", fallback_err);
                        fallback_err
                    })
            }
            (Err(e), _) => Err(e),
        }
    }
}

#[async_trait]
impl LedgerGateway for SolanaClient {
    async fn balance_of(&self, address: &Pubkey) -> Result<u64> {
        let address = *address;
        let balance = self
            .read("get_balance", move |rpc| async move {
                rpc.get_balance(&address)
                    .await
                    .map_err(|e| Error::SolanaRpc(format!("get_balance failed: {}", e)))
            })
            .await?;
        debug!("Balance of {}: {} lamports", address, balance);
        Ok(balance)
    }

    async fn latest_blockhash(&self) -> Result<Hash> {
        self.read("get_latest_blockhash", |rpc| async move {
            rpc.get_latest_blockhash()
                .await
                .map_err(|e| Error::SolanaRpc(format!("get_latest_blockhash failed: {}", e)))
        })
        .await
    }

    async fn estimate_fee(&self, message: &Message) -> Result<Option<u64>> {
        self.read("get_fee_for_message", |rpc| {
            let message = message.clone();
            async move {
                match rpc.get_fee_for_message(&message).await {
                    Ok(fee) => Ok(Some(fee)),
                    // the node answered but could not price the message
                    Err(e) if matches!(e.kind(), ClientErrorKind::Custom(_)) => {
                        debug!("No fee available for message: {}", e);
                        Ok(None)
                    }
                    Err(e) => Err(Error::SolanaRpc(format!("get_fee_for_message failed: {}", e))),
                }
            }
        })
        .await
    }

    async fn submit(&self, transaction: &Transaction, options: SubmitOptions) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: options.skip_preflight,
            preflight_commitment: Some(options.commitment.commitment),
            ..RpcSendTransactionConfig::default()
        };

        let signature = self
            .run_on(
                &self.primary,
                "send_transaction",
                &RetryConfig::no_retry(),
                &|rpc: Arc<RpcClient>| {
                    let config = config.clone();
                    async move {
                        rpc.send_transaction_with_config(transaction, config)
                            .await
                            .map_err(|e| Error::SolanaRpc(format!("send_transaction failed: {}", e)))
                    }
                },
            )
            .await?;

        self.await_confirmation(&signature, options.commitment).await?;
        Ok(signature)
    }

    async fn simulate(&self, transaction: &Transaction) -> Result<SimulationOutcome> {
        self.read("simulate_transaction", |rpc| async move {
            let response = rpc
                .simulate_transaction(transaction)
                .await
                .map_err(|e| Error::SolanaRpc(format!("simulate_transaction failed: {}", e)))?;
            Ok(SimulationOutcome {
                error: response.value.err.map(|e| e.to_string()),
                units_consumed: response.value.units_consumed,
            })
        })
        .await
    }

    async fn subscribe_logs(
        &self,
        address: &Pubkey,
        commitment: CommitmentConfig,
    ) -> Result<LogSubscription> {
        let (events_tx, events_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel::<std::result::Result<(), String>>();
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let pubsub = self.pubsub.clone();
        let mention = address.to_string();

        let driver = tokio::spawn(async move {
            let subscribed = pubsub
                .logs_subscribe(
                    RpcTransactionLogsFilter::Mentions(vec![mention.clone()]),
                    RpcTransactionLogsConfig {
                        commitment: Some(commitment),
                    },
                )
                .await;

            let (mut stream, unsubscribe) = match subscribed {
                Ok(pair) => pair,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            if ready_tx.send(Ok(())).is_err() {
                // caller gave up while we were subscribing
                drop(stream);
                unsubscribe().await;
                return;
            }
            debug!("Subscribed to logs mentioning {}", mention);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    item = stream.next() => {
                        let Some(response) = item else {
                            warn!("Log stream for {} closed by node", mention);
                            break;
                        };
                        let logs = response.value;
                        let event = match Signature::from_str(&logs.signature) {
                            Ok(signature) => LogEvent {
                                signature,
                                error: logs.err.map(|e| e.to_string()),
                            },
                            Err(e) => {
                                warn!("Skipping notification with bad signature {}: {}", logs.signature, e);
                                continue;
                            }
                        };
                        if events_tx.send(Ok(event)).await.is_err() {
                            break;
                        }
                    }
                }
            }

            drop(stream);
            unsubscribe().await;
            debug!("Unsubscribed from logs mentioning {}", mention);
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(LogSubscription::new(events_rx, cancel, Some(driver))),
            Ok(Err(e)) => Err(Error::Subscription(format!("logs_subscribe failed: {}", e))),
            Err(_) => Err(Error::Subscription("subscription task ended before subscribing".to_string())),
        }
    }

    async fn fetch_transaction(&self, signature: &Signature) -> Result<Option<ParsedTransaction>> {
        let signature = *signature;
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::JsonParsed),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        let params = json!([signature.to_string(), config]);

        let raw = self
            .read("get_transaction", move |rpc| {
                let params = params.clone();
                async move {
                    rpc.send::<Option<Value>>(RpcRequest::GetTransaction, params)
                        .await
                        .map_err(|e| Error::SolanaRpc(format!("get_transaction failed: {}", e)))
                }
            })
            .await?;

        Ok(raw.map(|value| ParsedTransaction::from_json_parsed(signature, &value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_address_valid() {
        let address = "11111111111111111111111111111111";
        let pubkey = SolanaClient::validate_address(address).unwrap();
        assert_eq!(pubkey.to_string(), address);
    }

    #[test]
    fn test_validate_address_invalid() {
        for address in ["", "not-base58-0OIl", "1111"] {
            let err = SolanaClient::validate_address(address).unwrap_err();
            assert!(matches!(err, Error::InvalidWalletAddress(_)));
        }
    }
}
