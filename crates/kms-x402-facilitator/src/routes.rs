use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use x402::{Network, SchemeFacilitator, SettlementStatus, SignedPayload, SCHEME_NAME};

use crate::state::AppState;

const SERVICE: &str = "x402-facilitator";

#[derive(Deserialize)]
pub struct HealthQuery {
    pub network: Option<Network>,
}

/// RPC reachability and balance sufficiency, for one network or all of them.
///
/// 503 when any RPC is unreachable. A low balance is reported but does not
/// degrade the status.
#[get("/health")]
pub async fn health(state: web::Data<AppState>, query: web::Query<HealthQuery>) -> HttpResponse {
    let networks = match query.network {
        Some(network) if state.facilitator.chain(network).is_none() => {
            return HttpResponse::NotFound().json(serde_json::json!({
                "status": "error",
                "service": SERVICE,
                "error": format!("network {network} is not configured"),
            }));
        }
        Some(network) => vec![network],
        None => state.facilitator.networks(),
    };

    let mut healthy = true;
    let mut reports = Vec::with_capacity(networks.len());
    for network in networks {
        let Some(chain) = state.facilitator.chain(network) else {
            continue;
        };
        let block = chain.health_check().await;
        let balance = state.facilitator.balance(network).await;

        match (&block, &balance) {
            (Ok(block), Ok(report)) => {
                state
                    .metrics
                    .balance_low
                    .with_label_values(&[network.as_str()])
                    .set(i64::from(!report.sufficient));
                reports.push(serde_json::json!({
                    "network": network,
                    "latestBlock": block.to_string(),
                    "balance": report.balance,
                    "sufficient": report.sufficient,
                }));
            }
            _ => {
                healthy = false;
                let error = block
                    .as_ref()
                    .err()
                    .or(balance.as_ref().err())
                    .map(ToString::to_string)
                    .unwrap_or_default();
                tracing::warn!(network = %network, error = %error, "health check failed");
                reports.push(serde_json::json!({
                    "network": network,
                    "error": "RPC unreachable",
                }));
            }
        }
    }

    let body = serde_json::json!({
        "status": if healthy { "ok" } else { "degraded" },
        "service": SERVICE,
        "signer": state.signer_kind.as_str(),
        "address": state.facilitator_address,
        "networks": reports,
    });
    if healthy {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

#[get("/metrics")]
pub async fn metrics_endpoint(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(state.metrics.render())
}

#[get("/supported")]
pub async fn supported(state: web::Data<AppState>) -> HttpResponse {
    let kinds: Vec<_> = state
        .facilitator
        .networks()
        .into_iter()
        .map(|network| {
            serde_json::json!({
                "scheme": SCHEME_NAME,
                "network": network,
            })
        })
        .collect();
    HttpResponse::Ok().json(serde_json::json!({
        "kinds": kinds,
        "signer": state.signer_kind.as_str(),
    }))
}

#[post("/verify")]
pub async fn verify(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let payload: SignedPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable verify request");
            state
                .metrics
                .verify_requests
                .with_label_values(&["bad_request"])
                .inc();
            return HttpResponse::BadRequest().json(serde_json::json!({
                "isValid": false,
                "invalidReason": "invalid request body",
            }));
        }
    };

    let result = state.facilitator.verify(&payload).await;
    let label = if result.is_valid { "valid" } else { "invalid" };
    state.metrics.verify_requests.with_label_values(&[label]).inc();
    HttpResponse::Ok().json(result)
}

#[post("/settle")]
pub async fn settle(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let payload: SignedPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable settle request");
            state
                .metrics
                .settle_requests
                .with_label_values(&["bad_request"])
                .inc();
            return HttpResponse::BadRequest().json(serde_json::json!({
                "success": false,
                "status": "failed",
                "errorReason": "invalid request body",
            }));
        }
    };

    let start = std::time::Instant::now();
    let result = state.facilitator.settle(&payload).await;
    let elapsed = start.elapsed().as_secs_f64();

    let label = match result.status {
        SettlementStatus::Confirmed => "confirmed",
        SettlementStatus::Failed => "failed",
        SettlementStatus::Unknown => "unknown",
    };
    state.metrics.settle_requests.with_label_values(&[label]).inc();
    state
        .metrics
        .settle_latency
        .with_label_values(&[label])
        .observe(elapsed);

    match result.status {
        SettlementStatus::Confirmed => tracing::info!(
            payer = ?result.payer,
            tx = ?result.transaction,
            network = %result.network,
            "settlement completed"
        ),
        _ => tracing::warn!(
            payer = ?result.payer,
            tx = ?result.transaction,
            status = label,
            reason = result.error_reason.as_deref().unwrap_or("unknown"),
            "settlement not confirmed"
        ),
    }
    HttpResponse::Ok().json(result)
}
