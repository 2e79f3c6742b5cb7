// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    error::{ApiError, ErrorBody},
    lease::EventRecord,
    state::AppState,
};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1_000;

#[derive(Debug, Deserialize, IntoParams)]
pub struct EventsQuery {
    /// Return events with a sequence number above this one.
    #[serde(default)]
    pub after: u64,
    /// Page size, capped at 1000.
    pub limit: Option<usize>,
}

/// Page through the audit trail in commit order.
#[utoipa::path(
    get,
    path = "/v1/events",
    params(EventsQuery),
    tag = "Events",
    responses(
        (status = 200, body = [EventRecord]),
        (status = 500, body = ErrorBody)
    )
)]
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<EventRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let market = state.market.lock().await;
    Ok(Json(market.events(query.after, limit)?))
}
