use std::sync::Arc;

use actix_web::{test, web, App};
use alloy::network::EthereumWallet;
use alloy::providers::ProviderBuilder;
use alloy::signers::local::PrivateKeySigner;

use x402::signer::LocalSigner;
use x402::{rpc_client, AlloyChain, Eip3009Facilitator, FacilitatorSettings, Network, Signer, SignerKind};
use x402_facilitator::metrics::Metrics;
use x402_facilitator::routes;
use x402_facilitator::state::AppState;

/// AppState with one network whose RPC endpoint refuses connections.
fn make_state() -> web::Data<AppState> {
    let wallet = PrivateKeySigner::random();
    let facilitator_address = wallet.address();

    let settings = FacilitatorSettings::default();
    let provider = ProviderBuilder::new()
        .wallet(EthereumWallet::from(wallet.clone()))
        .connect_client(rpc_client("http://localhost:1", settings.rpc_timeout).unwrap());

    let chain = AlloyChain::new(
        provider,
        facilitator_address,
        Network::BaseSepolia.chain_id(),
        settings.send_timeout,
    );
    let signer = Arc::new(Signer::Local(LocalSigner::new(wallet)));
    let facilitator =
        Eip3009Facilitator::new(signer, settings).with_chain(Network::BaseSepolia, chain);

    web::Data::new(AppState {
        facilitator,
        facilitator_address,
        signer_kind: SignerKind::PrivateKey,
        metrics: Metrics::new().unwrap(),
    })
}

fn now() -> u64 {
    x402::verifier::unix_now()
}

/// A payload whose requirement has already expired, so verification stops
/// before any RPC call.
fn expired_payload(network: &str) -> serde_json::Value {
    serde_json::json!({
        "authorization": {
            "from": "0x0000000000000000000000000000000000000001",
            "to": "0x0000000000000000000000000000000000000002",
            "value": "1000000",
            "validAfter": 0,
            "validBefore": now() + 600,
            "nonce": format!("0x{}", "11".repeat(32)),
        },
        "signature": format!("0x{}", "00".repeat(65)),
        "requirement": {
            "scheme": "exact",
            "network": network,
            "token": "USDC",
            "amount": "1000000",
            "recipient": "0x0000000000000000000000000000000000000002",
            "paymentId": "pay_1",
            "expiresAt": now() - 10,
        },
        "payer": "0x0000000000000000000000000000000000000001",
    })
}

#[actix_rt::test]
async fn test_supported_lists_configured_networks() {
    let app = test::init_service(App::new().app_data(make_state()).service(routes::supported)).await;

    let req = test::TestRequest::get().uri("/supported").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["kinds"].as_array().unwrap().len(), 1);
    assert_eq!(body["kinds"][0]["scheme"], "exact");
    assert_eq!(body["kinds"][0]["network"], "base-sepolia");
    assert_eq!(body["signer"], "private-key");
}

#[actix_rt::test]
async fn test_verify_rejects_unparseable_body() {
    let app = test::init_service(App::new().app_data(make_state()).service(routes::verify)).await;

    let req = test::TestRequest::post()
        .uri("/verify")
        .set_payload("{}")
        .insert_header(("Content-Type", "application/json"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["isValid"], false);
    assert_eq!(body["invalidReason"], "invalid request body");
}

#[actix_rt::test]
async fn test_verify_reports_expired_requirement() {
    let app = test::init_service(App::new().app_data(make_state()).service(routes::verify)).await;

    let req = test::TestRequest::post()
        .uri("/verify")
        .set_json(expired_payload("base-sepolia"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["isValid"], false);
    assert_eq!(body["invalidReason"], "Payment requirement expired");
    assert_eq!(body["payer"], "0x0000000000000000000000000000000000000001");
}

#[actix_rt::test]
async fn test_settle_rejects_unconfigured_network() {
    let app = test::init_service(App::new().app_data(make_state()).service(routes::settle)).await;

    let req = test::TestRequest::post()
        .uri("/settle")
        .set_json(expired_payload("avalanche"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "failed");
    assert_eq!(
        body["errorReason"],
        "Network not supported by this facilitator"
    );
    assert_eq!(body["network"], "avalanche");
}

#[actix_rt::test]
async fn test_health_degrades_when_rpc_unreachable() {
    let app = test::init_service(App::new().app_data(make_state()).service(routes::health)).await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 503);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["networks"][0]["network"], "base-sepolia");
    assert_eq!(body["networks"][0]["error"], "RPC unreachable");
}

#[actix_rt::test]
async fn test_health_for_unconfigured_network_is_not_found() {
    let app = test::init_service(App::new().app_data(make_state()).service(routes::health)).await;

    let req = test::TestRequest::get().uri("/health?network=base").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 404);
}

#[actix_rt::test]
async fn test_metrics_count_verify_results() {
    let app = test::init_service(
        App::new()
            .app_data(make_state())
            .service(routes::verify)
            .service(routes::metrics_endpoint),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/verify")
        .set_json(expired_payload("base-sepolia"))
        .to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body = test::read_body(resp).await;
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("x402_facilitator_verify_total{result=\"invalid\"} 1"));
}
