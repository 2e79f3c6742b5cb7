// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Path, State},
    Json,
};

use super::parse_address;
use crate::{
    error::{ApiError, ErrorBody},
    models::AccountResponse,
    state::AppState,
};

/// Ledger balance of any address. Unknown accounts report zero.
#[utoipa::path(
    get,
    path = "/v1/accounts/{address}",
    params(("address" = String, Path, description = "Account address")),
    tag = "Accounts",
    responses(
        (status = 200, body = AccountResponse),
        (status = 400, body = ErrorBody)
    )
)]
pub async fn get_account(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<AccountResponse>, ApiError> {
    let address = parse_address(&address)?;
    let market = state.market.lock().await;
    Ok(Json(AccountResponse {
        address,
        balance: market.balance_of(address),
        penalties: market.penalties_of(address),
    }))
}
