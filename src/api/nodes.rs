// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use super::parse_address;
use crate::{
    auth::Auth,
    error::{ApiError, ErrorBody},
    models::{
        RegisterNodeRequest, ReportAliveRequest, ReportAliveResponse, ReportDeadRequest,
        ReportDeadResponse,
    },
    registry::NodeRecord,
    state::AppState,
};

/// Register a trusted enclave as a storage node.
///
/// The caller is the operator: it posts the bond and receives liveness
/// payouts. The enclave consents by signing a `register` claim over
/// `{operator}:{capacity}:{bond}`.
#[utoipa::path(
    post,
    path = "/v1/nodes",
    request_body = RegisterNodeRequest,
    tag = "Nodes",
    responses(
        (status = 201, body = NodeRecord),
        (status = 400, description = "Untrusted signer, stale claim or unfunded bond", body = ErrorBody),
        (status = 409, description = "Node already registered", body = ErrorBody)
    ),
    security(("signature" = []))
)]
pub async fn register_node(
    State(state): State<AppState>,
    Auth(operator): Auth,
    Json(request): Json<RegisterNodeRequest>,
) -> Result<(StatusCode, Json<NodeRecord>), ApiError> {
    let mut market = state.market.lock().await;
    let record = market.register_node(operator, request.capacity, request.bond, &request.claim)?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[utoipa::path(
    get,
    path = "/v1/nodes/{address}",
    params(("address" = String, Path, description = "Node signing address")),
    tag = "Nodes",
    responses(
        (status = 200, body = NodeRecord),
        (status = 404, body = ErrorBody)
    )
)]
pub async fn get_node(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<NodeRecord>, ApiError> {
    let address = parse_address(&address)?;
    let market = state.market.lock().await;
    market
        .node(address)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("node {address} not registered")))
}

#[utoipa::path(
    post,
    path = "/v1/nodes/alive",
    request_body = ReportAliveRequest,
    tag = "Nodes",
    responses(
        (status = 200, body = ReportAliveResponse),
        (status = 400, description = "Claim not signed by the node", body = ErrorBody),
        (status = 409, description = "Claim is not newer than the last report", body = ErrorBody)
    )
)]
pub async fn report_alive(
    State(state): State<AppState>,
    Json(request): Json<ReportAliveRequest>,
) -> Result<Json<ReportAliveResponse>, ApiError> {
    let mut market = state.market.lock().await;
    let payout = market.report_alive(request.node, &request.claim)?;
    Ok(Json(ReportAliveResponse {
        node: request.node,
        payout,
    }))
}

/// Report a node that stopped proving liveness. Anyone may call this once
/// the node has been silent for longer than the dead timeout.
#[utoipa::path(
    post,
    path = "/v1/nodes/{address}/dead",
    params(("address" = String, Path, description = "Node signing address")),
    request_body = ReportDeadRequest,
    tag = "Nodes",
    responses(
        (status = 200, body = ReportDeadResponse),
        (status = 404, body = ErrorBody),
        (status = 409, description = "Node is still alive", body = ErrorBody)
    )
)]
pub async fn report_dead(
    Path(address): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<ReportDeadRequest>,
) -> Result<Json<ReportDeadResponse>, ApiError> {
    let node = parse_address(&address)?;
    let mut market = state.market.lock().await;
    let processed = market.report_dead(node, &request.lease_ids)?;
    Ok(Json(ReportDeadResponse { node, processed }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{TestApp, BOND, SIZE};
    use crate::market::registration_subject;
    use crate::signature::testing::{sign_claim, signer};
    use crate::signature::{address_subject, ClaimKind};

    #[tokio::test]
    async fn register_node_rejects_untrusted_and_duplicate_keys() {
        let app = TestApp::new();
        let key = signer(3);
        let operator = app.owner.address();
        let claim = sign_claim(
            &key,
            ClaimKind::Register,
            &registration_subject(operator, 500, BOND),
            app.now(),
        );

        // Not in the trusted signer set.
        let err = register_node(
            State(app.state.clone()),
            Auth(operator),
            Json(RegisterNodeRequest {
                capacity: 500,
                bond: BOND,
                claim,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "unverified_signer");

        let key = &app.nodes[0];
        let claim = sign_claim(
            key,
            ClaimKind::Register,
            &registration_subject(operator, 1_000, BOND),
            app.now(),
        );
        let err = register_node(
            State(app.state.clone()),
            Auth(operator),
            Json(RegisterNodeRequest {
                capacity: 1_000,
                bond: BOND,
                claim,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn registration_claim_binds_operator() {
        let app = TestApp::new();
        let claim = sign_claim(
            &app.spare,
            ClaimKind::Register,
            &registration_subject(app.owner.address(), 500, BOND),
            app.now(),
        );

        // A different caller cannot reuse the claim to bond its own funds.
        let err = register_node(
            State(app.state.clone()),
            Auth(signer(0xbb).address()),
            Json(RegisterNodeRequest {
                capacity: 500,
                bond: BOND,
                claim: claim.clone(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "unverified_signer");

        let (status, Json(record)) = register_node(
            State(app.state.clone()),
            Auth(app.owner.address()),
            Json(RegisterNodeRequest {
                capacity: 500,
                bond: BOND,
                claim,
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(record.address, app.spare.address());
        assert_eq!(record.owner, app.owner.address());

        let Json(fetched) = get_node(
            Path(format!("{:#x}", record.address)),
            State(app.state.clone()),
        )
        .await
        .unwrap();
        assert_eq!(fetched, record);
    }

    #[tokio::test]
    async fn report_alive_pays_for_occupied_storage() {
        let app = TestApp::new();
        app.open_live_lease().await;
        app.clock.advance(10);

        let node = app.nodes[0].address();
        let claim = sign_claim(&app.nodes[0], ClaimKind::Alive, &address_subject(node), app.now());
        let Json(response) = report_alive(
            State(app.state.clone()),
            Json(ReportAliveRequest {
                node,
                claim: claim.clone(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.payout, 10 * SIZE as u128);

        let err = report_alive(State(app.state.clone()), Json(ReportAliveRequest { node, claim }))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn report_dead_requires_silence() {
        let app = TestApp::new();
        let lease_id = app.open_live_lease().await;
        let node = format!("{:#x}", app.nodes[0].address());

        let err = report_dead(
            Path(node.clone()),
            State(app.state.clone()),
            Json(ReportDeadRequest {
                lease_ids: vec![lease_id],
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, "node_still_alive");

        app.clock.advance(201);
        let Json(response) = report_dead(
            Path(node),
            State(app.state.clone()),
            Json(ReportDeadRequest {
                lease_ids: vec![lease_id, lease_id],
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.processed, vec![lease_id]);

        let market = app.state.market.lock().await;
        assert_eq!(market.assignments(lease_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_node_is_not_found() {
        let app = TestApp::new();
        let err = get_node(
            Path(format!("{:#x}", signer(9).address())),
            State(app.state.clone()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
