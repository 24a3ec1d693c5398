//! End-to-end detection scenario against a mocked RPC endpoint:
//! a known-discriminator initialize with sufficient accounts yields exactly
//! one candidate above the floor, while an initialize2 one account short of
//! its layout yields none.

use lp_sniffer::config::Config;
use lp_sniffer::detector::{DetectorContext, PipelineCoordinator};
use lp_sniffer::types::Protocol;
use mockito::Matcher;
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;

const RAYDIUM_AMM_V4: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";

fn transaction_body(keys: &[String]) -> serde_json::Value {
    json!({
        "slot": 100,
        "blockTime": 1_700_000_000i64,
        "transaction": {
            "message": {
                "accountKeys": keys,
                "instructions": [
                    // initialize (tag 0): 14 accounts, sufficient
                    {
                        "programIdIndex": 17,
                        "accounts": (0..14).collect::<Vec<u8>>(),
                        "data": bs58::encode([0u8, 0, 0, 0]).into_string(),
                    },
                    // initialize2 (tag 1): 16 accounts, one short of 17
                    {
                        "programIdIndex": 17,
                        "accounts": (0..16).collect::<Vec<u8>>(),
                        "data": bs58::encode([1u8, 0, 0, 0]).into_string(),
                    }
                ]
            }
        }
    })
}

#[tokio::test]
async fn known_initialize_yields_exactly_one_candidate() {
    let mut server = mockito::Server::new_async().await;

    // 17 regular keys plus the Raydium program at index 17
    let mut keys: Vec<String> = (0..17).map(|_| Pubkey::new_unique().to_string()).collect();
    keys.push(RAYDIUM_AMM_V4.to_string());

    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJsonString(
            r#"{"method":"getSignaturesForAddress"}"#.to_string(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"jsonrpc":"2.0","id":1,"result":[
                {"signature":"e2e-sig","slot":100,"blockTime":1700000000,"err":null}
            ]}"#,
        )
        .create_async()
        .await;

    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJsonString(
            r#"{"method":"getTransaction"}"#.to_string(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": transaction_body(&keys),
            })
            .to_string(),
        )
        .create_async()
        .await;

    // Both previously-unvalidated mints resolve to token-program accounts
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJsonString(
            r#"{"method":"getAccountInfo"}"#.to_string(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"jsonrpc":"2.0","id":1,"result":{"context":{"slot":100},"value":{
                "owner":"TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA",
                "lamports":1461600,"data":["","base64"],"executable":false}}}"#,
        )
        .expect_at_least(2)
        .create_async()
        .await;

    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJsonString(
            r#"{"method":"getTokenSupply"}"#.to_string(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"jsonrpc":"2.0","id":1,"result":{"context":{"slot":100},"value":{
                "amount":"1000000000","decimals":6,"uiAmount":1000.0,"uiAmountString":"1000"}}}"#,
        )
        .expect_at_least(2)
        .create_async()
        .await;

    let mut config = Config::from_urls(&[server.url()]);
    config.validator.network_timeout_ms = 2_000;

    let ctx = Arc::new(DetectorContext::new(config));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let coordinator = PipelineCoordinator::new(ctx.clone(), tx);

    coordinator.run_cycle(Protocol::Raydium).await;

    let candidate = rx.try_recv().expect("exactly one candidate expected");
    assert_eq!(candidate.protocol, Protocol::Raydium);
    assert_eq!(candidate.primary_mint.to_string(), keys[8]);
    assert_eq!(candidate.secondary_mint.to_string(), keys[9]);
    assert_eq!(candidate.pool_address.to_string(), keys[4]);
    assert!(
        candidate.confidence >= 0.65,
        "confidence {} under floor",
        candidate.confidence
    );
    assert!(candidate.discovered_at > 0);

    // The structurally insufficient initialize2 produced nothing
    assert!(rx.try_recv().is_err(), "only one candidate may be emitted");
    assert!(ctx.telemetry.no_candidate.load(Ordering::Relaxed) >= 1);

    // A second cycle reprocesses nothing: the signature is already seen
    coordinator.run_cycle(Protocol::Raydium).await;
    assert!(rx.try_recv().is_err());
    assert!(ctx.telemetry.signatures_deduped.load(Ordering::Relaxed) >= 1);
}
