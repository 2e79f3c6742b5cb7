// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use alloy::primitives::Address;
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    error::{ApiError, ErrorBody},
    lease::{EventRecord, LeaseEvent, NodeAssignment, TerminationReason},
    models::{
        AccountResponse, AcknowledgeResponse, CreateLeaseRequest, LeaseView, RefundResponse,
        RegisterNodeRequest, ReportAliveRequest, ReportAliveResponse, ReportDeadRequest,
        ReportDeadResponse, UpdateLeaseEndRequest,
    },
    registry::NodeRecord,
    signature::SignedClaim,
    state::AppState,
};

pub mod accounts;
pub mod events;
pub mod health;
pub mod leases;
pub mod nodes;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/leases", post(leases::create_lease))
        .route(
            "/leases/{lease_id}",
            get(leases::get_lease).delete(leases::terminate_lease),
        )
        .route("/leases/{lease_id}/nodes", get(leases::get_lease_nodes))
        .route("/leases/{lease_id}/ack", post(leases::acknowledge_lease))
        .route("/leases/{lease_id}/sweep", post(leases::sweep_lease))
        .route("/leases/{lease_id}/end", put(leases::update_lease_end))
        .route("/nodes", post(nodes::register_node))
        .route("/nodes/alive", post(nodes::report_alive))
        .route("/nodes/{address}", get(nodes::get_node))
        .route("/nodes/{address}/dead", post(nodes::report_dead))
        .route("/accounts/{address}", get(accounts::get_account))
        .route("/events", get(events::list_events));

    Router::new()
        .nest("/v1", v1_routes)
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

/// Parse a 0x-prefixed address from a path segment.
pub(crate) fn parse_address(raw: &str) -> Result<Address, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("invalid address: {raw}")))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        leases::create_lease,
        leases::get_lease,
        leases::get_lease_nodes,
        leases::acknowledge_lease,
        leases::sweep_lease,
        leases::update_lease_end,
        leases::terminate_lease,
        nodes::register_node,
        nodes::get_node,
        nodes::report_alive,
        nodes::report_dead,
        accounts::get_account,
        events::list_events,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            CreateLeaseRequest,
            UpdateLeaseEndRequest,
            LeaseView,
            NodeAssignment,
            AcknowledgeResponse,
            RefundResponse,
            SignedClaim,
            RegisterNodeRequest,
            NodeRecord,
            ReportAliveRequest,
            ReportAliveResponse,
            ReportDeadRequest,
            ReportDeadResponse,
            AccountResponse,
            EventRecord,
            LeaseEvent,
            TerminationReason,
            ErrorBody,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Leases", description = "Lease lifecycle and escrow"),
        (name = "Nodes", description = "Storage node registration and liveness"),
        (name = "Accounts", description = "Ledger balances"),
        (name = "Events", description = "Audit trail"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;

/// Documents the `Authorization: Signature <timestamp>.<hex>` scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "signature",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("Authorization"))),
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use alloy::signers::local::PrivateKeySigner;

    use crate::auth::AUTH_SUBJECT;
    use crate::clock::{Clock, ManualClock};
    use crate::config::MarketConfig;
    use crate::lease::{storage_cost, LeaseId, Timestamp};
    use crate::market::{registration_subject, Market};
    use crate::signature::testing::{sign_claim, signer};
    use crate::signature::{ClaimKind, SignedClaim};
    use crate::state::AppState;

    pub const T0: Timestamp = 1_700_000_000;
    pub const SIZE: u64 = 10;
    pub const DURATION: u64 = 1_000;
    pub const FUNDS: u128 = 1_000_000_000;
    pub const BOND: u128 = 100;

    /// Two registered nodes, replication factor 2 and a funded owner.
    pub struct TestApp {
        pub state: AppState,
        pub clock: Arc<ManualClock>,
        pub owner: PrivateKeySigner,
        pub nodes: Vec<PrivateKeySigner>,
        /// Trusted enclave key that has not registered yet.
        pub spare: PrivateKeySigner,
    }

    impl TestApp {
        pub fn new() -> Self {
            let owner = signer(0xaa);
            let nodes = vec![signer(1), signer(2)];
            let spare = signer(4);

            let mut config = MarketConfig {
                data_dir: None,
                trusted_signers: nodes
                    .iter()
                    .chain([&spare])
                    .map(|k| k.address())
                    .collect(),
                ledger_genesis: vec![(owner.address(), FUNDS)],
                ..Default::default()
            };
            config.lease.replication_factor = 2;
            config.lease.min_duration = 100;
            config.lease.ack_timeout = 50;
            config.lease.dead_timeout = 200;

            let clock = Arc::new(ManualClock::new(T0));
            let mut market = Market::new(&config, clock.clone()).unwrap();
            for key in &nodes {
                let subject = registration_subject(owner.address(), 1_000, BOND);
                let claim = sign_claim(key, ClaimKind::Register, &subject, T0);
                market
                    .register_node(owner.address(), 1_000, BOND, &claim)
                    .unwrap();
            }

            Self {
                state: AppState::new(market, clock.clone()),
                clock,
                owner,
                nodes,
                spare,
            }
        }

        pub fn now(&self) -> Timestamp {
            self.clock.now()
        }

        /// Exact deposit for a `SIZE` lease of `DURATION` seconds.
        pub fn deposit() -> u128 {
            storage_cost(DURATION, SIZE, 1, 2).unwrap()
        }

        pub fn auth_claim(&self, key: &PrivateKeySigner) -> SignedClaim {
            sign_claim(key, ClaimKind::Auth, AUTH_SUBJECT, self.now())
        }

        pub fn ack_claim(&self, key: &PrivateKeySigner, lease_id: LeaseId) -> SignedClaim {
            sign_claim(key, ClaimKind::Acknowledge, &lease_id.to_string(), self.now())
        }

        /// Open a lease directly on the market and return its id.
        pub async fn open_lease(&self) -> LeaseId {
            let mut market = self.state.market.lock().await;
            market
                .create_lease(self.owner.address(), SIZE, self.now() + DURATION, Self::deposit())
                .unwrap()
                .id
        }

        /// Open a lease and have every node acknowledge it.
        pub async fn open_live_lease(&self) -> LeaseId {
            let lease_id = self.open_lease().await;
            let mut market = self.state.market.lock().await;
            for key in &self.nodes {
                market
                    .acknowledge(lease_id, &self.ack_claim(key, lease_id))
                    .unwrap();
            }
            lease_id
        }
    }
}
