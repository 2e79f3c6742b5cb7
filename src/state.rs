// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::market::Market;
use crate::signature::SignatureAuthority;

#[derive(Clone)]
pub struct AppState {
    /// Single lock around the engine: every market operation is serialized.
    pub market: Arc<Mutex<Market>>,
    pub authority: SignatureAuthority,
    pub clock: Arc<dyn Clock>,
    pub signature_max_age: u64,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(market: Market, clock: Arc<dyn Clock>) -> Self {
        Self {
            authority: market.authority().clone(),
            signature_max_age: market.signature_max_age(),
            market: Arc::new(Mutex::new(market)),
            clock,
            started_at: Utc::now(),
        }
    }
}
