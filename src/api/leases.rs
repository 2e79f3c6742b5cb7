// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::{
    auth::Auth,
    error::{ApiError, ErrorBody},
    lease::NodeAssignment,
    models::{
        AcknowledgeResponse, CreateLeaseRequest, LeaseView, RefundResponse, UpdateLeaseEndRequest,
    },
    signature::SignedClaim,
    state::AppState,
};

#[utoipa::path(
    post,
    path = "/v1/leases",
    request_body = CreateLeaseRequest,
    tag = "Leases",
    responses(
        (status = 201, body = LeaseView),
        (status = 400, description = "Invalid size, duration or deposit", body = ErrorBody),
        (status = 401, description = "Missing or invalid caller signature"),
        (status = 503, description = "Not enough nodes with free capacity", body = ErrorBody)
    ),
    security(("signature" = []))
)]
pub async fn create_lease(
    State(state): State<AppState>,
    Auth(owner): Auth,
    Json(request): Json<CreateLeaseRequest>,
) -> Result<(StatusCode, Json<LeaseView>), ApiError> {
    let mut market = state.market.lock().await;
    let lease = market.create_lease(owner, request.size_limit, request.end_time, request.deposit)?;
    Ok((StatusCode::CREATED, Json(LeaseView::new(&lease, market.now()))))
}

#[utoipa::path(
    get,
    path = "/v1/leases/{lease_id}",
    params(("lease_id" = u64, Path, description = "Lease identifier")),
    tag = "Leases",
    responses(
        (status = 200, body = LeaseView),
        (status = 404, body = ErrorBody)
    )
)]
pub async fn get_lease(
    Path(lease_id): Path<u64>,
    State(state): State<AppState>,
) -> Result<Json<LeaseView>, ApiError> {
    let market = state.market.lock().await;
    let lease = market.lease(lease_id)?;
    Ok(Json(LeaseView::new(&lease, market.now())))
}

#[utoipa::path(
    get,
    path = "/v1/leases/{lease_id}/nodes",
    params(("lease_id" = u64, Path, description = "Lease identifier")),
    tag = "Leases",
    responses(
        (status = 200, body = [NodeAssignment]),
        (status = 404, body = ErrorBody)
    )
)]
pub async fn get_lease_nodes(
    Path(lease_id): Path<u64>,
    State(state): State<AppState>,
) -> Result<Json<Vec<NodeAssignment>>, ApiError> {
    let market = state.market.lock().await;
    Ok(Json(market.assignments(lease_id)?))
}

/// Acknowledge storage of a lease. The body is a claim signed by the
/// assigned node over the lease id.
#[utoipa::path(
    post,
    path = "/v1/leases/{lease_id}/ack",
    params(("lease_id" = u64, Path, description = "Lease identifier")),
    request_body = SignedClaim,
    tag = "Leases",
    responses(
        (status = 200, body = AcknowledgeResponse),
        (status = 403, description = "Signer is not assigned or not trusted", body = ErrorBody),
        (status = 409, description = "Already acknowledged or window closed", body = ErrorBody)
    )
)]
pub async fn acknowledge_lease(
    Path(lease_id): Path<u64>,
    State(state): State<AppState>,
    Json(claim): Json<SignedClaim>,
) -> Result<Json<AcknowledgeResponse>, ApiError> {
    let mut market = state.market.lock().await;
    let live = market.acknowledge(lease_id, &claim)?;
    Ok(Json(AcknowledgeResponse { lease_id, live }))
}

/// Refund and remove a lease whose acknowledgment windows all elapsed
/// without every node confirming.
#[utoipa::path(
    post,
    path = "/v1/leases/{lease_id}/sweep",
    params(("lease_id" = u64, Path, description = "Lease identifier")),
    tag = "Leases",
    responses(
        (status = 200, body = RefundResponse),
        (status = 409, description = "Window still open or lease already live", body = ErrorBody)
    )
)]
pub async fn sweep_lease(
    Path(lease_id): Path<u64>,
    State(state): State<AppState>,
) -> Result<Json<RefundResponse>, ApiError> {
    let mut market = state.market.lock().await;
    let refund = market.sweep_unacknowledged(lease_id)?;
    Ok(Json(RefundResponse { lease_id, refund }))
}

#[utoipa::path(
    put,
    path = "/v1/leases/{lease_id}/end",
    params(("lease_id" = u64, Path, description = "Lease identifier")),
    request_body = UpdateLeaseEndRequest,
    tag = "Leases",
    responses(
        (status = 200, body = LeaseView),
        (status = 400, body = ErrorBody),
        (status = 403, description = "Caller does not own the lease"),
        (status = 409, description = "Lease expired or not yet live", body = ErrorBody)
    ),
    security(("signature" = []))
)]
pub async fn update_lease_end(
    Path(lease_id): Path<u64>,
    State(state): State<AppState>,
    caller: Auth,
    Json(request): Json<UpdateLeaseEndRequest>,
) -> Result<Json<LeaseView>, ApiError> {
    let mut market = state.market.lock().await;
    caller.require(market.lease(lease_id)?.owner)?;

    let lease = market.update_lease_end(lease_id, caller.0, request.end_time, request.deposit)?;
    Ok(Json(LeaseView::new(&lease, market.now())))
}

/// Settle a lease to the current time and refund the remaining escrow to
/// its owner.
#[utoipa::path(
    delete,
    path = "/v1/leases/{lease_id}",
    params(("lease_id" = u64, Path, description = "Lease identifier")),
    tag = "Leases",
    responses(
        (status = 200, body = RefundResponse),
        (status = 404, body = ErrorBody)
    )
)]
pub async fn terminate_lease(
    Path(lease_id): Path<u64>,
    State(state): State<AppState>,
) -> Result<Json<RefundResponse>, ApiError> {
    let mut market = state.market.lock().await;
    let refund = market.terminate(lease_id)?;
    Ok(Json(RefundResponse { lease_id, refund }))
}
