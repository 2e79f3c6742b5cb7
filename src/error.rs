// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::AuthError;
use crate::lease::{ErrorKind, LeaseError};
use crate::ledger::LedgerError;
use crate::market::MarketError;
use crate::registry::RegistryError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: &'static str,
}

/// JSON error body returned by every endpoint.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub error_code: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            error_code: self.code.to_string(),
        });
        (self.status, body).into_response()
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Resource => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::State | ErrorKind::Duplicate => StatusCode::CONFLICT,
        ErrorKind::Collaborator => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::new(e.status_code(), e.error_code(), e.to_string())
    }
}

impl From<LeaseError> for ApiError {
    fn from(e: LeaseError) -> Self {
        Self::new(status_for(e.kind()), e.error_code(), e.to_string())
    }
}

impl From<MarketError> for ApiError {
    fn from(e: MarketError) -> Self {
        match e {
            MarketError::Lease(e) => e.into(),
            MarketError::Registry(e) => {
                let status = match e {
                    RegistryError::UnknownNode(_) => StatusCode::NOT_FOUND,
                    RegistryError::AlreadyRegistered(_) => StatusCode::CONFLICT,
                    RegistryError::CapacityUnderflow { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                };
                Self::new(status, e.error_code(), e.to_string())
            }
            MarketError::Ledger(e) => {
                let status = match e {
                    LedgerError::InsufficientFunds { .. } => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                Self::new(status, e.error_code(), e.to_string())
            }
            MarketError::Storage(e) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                format!("operation committed but could not be persisted: {e}"),
            ),
        }
    }
}
