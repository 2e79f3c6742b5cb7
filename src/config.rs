// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment once at startup and
//! validated before any state is built.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory for the lease database (empty disables persistence) | `./data` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,enclave_lease_server=debug,tower_http=debug` |
//! | `REPLICATION_FACTOR` | Nodes assigned to each lease | `3` |
//! | `FEE_RATE` | Price per byte per second per replica | `1` |
//! | `GLOBAL_MAX_SIZE` | Largest lease size in bytes | `1048576` |
//! | `MIN_DURATION` | Shortest lease in seconds | `86400` |
//! | `MAX_DURATION` | Longest lease in seconds | `31536000` |
//! | `ACK_TIMEOUT` | Seconds a node has to acknowledge | `3600` |
//! | `DEAD_TIMEOUT` | Seconds of silence before a node may be reported dead | `86400` |
//! | `SIGNATURE_MAX_AGE` | Oldest accepted signed claim in seconds | `300` |
//! | `SLASH_RATE` | Bond forfeited per byte when a node is slashed | `1` |
//! | `PROTOCOL_POOL` | Beneficiary address of slashed bonds | zero address |
//! | `TRUSTED_SIGNERS` | Comma-separated enclave signer addresses | empty |
//! | `LEDGER_GENESIS` | Initial balances, `0xaddr=amount,...` | empty |
//! | `KEEPER_INTERVAL_SECS` | Keeper tick in seconds (`0` disables) | `60` |

use std::path::PathBuf;

use alloy::primitives::Address;

use crate::lease::{Amount, LeaseParams};

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";

/// Directory holding `leases.redb`. Set to an empty string to run without
/// persistence.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// `json` for structured production logs, anything else for pretty output.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const REPLICATION_FACTOR_ENV: &str = "REPLICATION_FACTOR";
pub const FEE_RATE_ENV: &str = "FEE_RATE";
pub const GLOBAL_MAX_SIZE_ENV: &str = "GLOBAL_MAX_SIZE";
pub const MIN_DURATION_ENV: &str = "MIN_DURATION";
pub const MAX_DURATION_ENV: &str = "MAX_DURATION";
pub const ACK_TIMEOUT_ENV: &str = "ACK_TIMEOUT";
pub const DEAD_TIMEOUT_ENV: &str = "DEAD_TIMEOUT";
pub const SIGNATURE_MAX_AGE_ENV: &str = "SIGNATURE_MAX_AGE";
pub const SLASH_RATE_ENV: &str = "SLASH_RATE";
pub const PROTOCOL_POOL_ENV: &str = "PROTOCOL_POOL";

/// Enclave signing addresses backed by a trusted image. Stands in for
/// attestation.
pub const TRUSTED_SIGNERS_ENV: &str = "TRUSTED_SIGNERS";

/// Genesis balances for the in-memory ledger.
pub const LEDGER_GENESIS_ENV: &str = "LEDGER_GENESIS";

pub const KEEPER_INTERVAL_ENV: &str = "KEEPER_INTERVAL_SECS";

const DEFAULT_DATA_DIR: &str = "./data";
const DAY: u64 = 24 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone)]
pub struct MarketConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    pub log_format: LogFormat,
    pub lease: LeaseParams,
    pub signature_max_age: u64,
    pub slash_rate: Amount,
    pub trusted_signers: Vec<Address>,
    pub ledger_genesis: Vec<(Address, Amount)>,
    pub keeper_interval_secs: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_dir: Some(PathBuf::from(DEFAULT_DATA_DIR)),
            log_format: LogFormat::Pretty,
            lease: LeaseParams {
                replication_factor: 3,
                fee_rate: 1,
                max_size: 1024 * 1024,
                min_duration: DAY,
                max_duration: 365 * DAY,
                ack_timeout: 60 * 60,
                dead_timeout: DAY,
                protocol_pool: Address::ZERO,
            },
            signature_max_age: 5 * 60,
            slash_rate: 1,
            trusted_signers: Vec::new(),
            ledger_genesis: Vec::new(),
            keeper_interval_secs: 60,
        }
    }
}

impl MarketConfig {
    /// Load from the process environment and validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable source. Unset variables keep their
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let get = |var: &'static str| lookup(var).map(|v| (var, v));

        if let Some((_, host)) = get(HOST_ENV) {
            config.host = host;
        }
        if let Some((var, port)) = get(PORT_ENV) {
            config.port = parse(var, &port)?;
        }
        if let Some((_, dir)) = get(DATA_DIR_ENV) {
            config.data_dir = (!dir.trim().is_empty()).then(|| PathBuf::from(dir));
        }
        if let Some((_, format)) = get(LOG_FORMAT_ENV) {
            config.log_format = if format.eq_ignore_ascii_case("json") {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            };
        }

        let lease = &mut config.lease;
        if let Some((var, v)) = get(REPLICATION_FACTOR_ENV) {
            lease.replication_factor = parse(var, &v)?;
        }
        if let Some((var, v)) = get(FEE_RATE_ENV) {
            lease.fee_rate = parse(var, &v)?;
        }
        if let Some((var, v)) = get(GLOBAL_MAX_SIZE_ENV) {
            lease.max_size = parse(var, &v)?;
        }
        if let Some((var, v)) = get(MIN_DURATION_ENV) {
            lease.min_duration = parse(var, &v)?;
        }
        if let Some((var, v)) = get(MAX_DURATION_ENV) {
            lease.max_duration = parse(var, &v)?;
        }
        if let Some((var, v)) = get(ACK_TIMEOUT_ENV) {
            lease.ack_timeout = parse(var, &v)?;
        }
        if let Some((var, v)) = get(DEAD_TIMEOUT_ENV) {
            lease.dead_timeout = parse(var, &v)?;
        }
        if let Some((var, v)) = get(PROTOCOL_POOL_ENV) {
            lease.protocol_pool = parse(var, &v)?;
        }

        if let Some((var, v)) = get(SIGNATURE_MAX_AGE_ENV) {
            config.signature_max_age = parse(var, &v)?;
        }
        if let Some((var, v)) = get(SLASH_RATE_ENV) {
            config.slash_rate = parse(var, &v)?;
        }
        if let Some((var, v)) = get(TRUSTED_SIGNERS_ENV) {
            config.trusted_signers = list(&v)
                .map(|item| parse(var, item))
                .collect::<Result<_, _>>()?;
        }
        if let Some((var, v)) = get(LEDGER_GENESIS_ENV) {
            config.ledger_genesis = list(&v)
                .map(|item| parse_allocation(var, item))
                .collect::<Result<_, _>>()?;
        }
        if let Some((var, v)) = get(KEEPER_INTERVAL_ENV) {
            config.keeper_interval_secs = parse(var, &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject parameter sets the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lease = &self.lease;
        if lease.replication_factor == 0 {
            return Err(ConfigError::Inconsistent(
                "replication factor must be at least 1".to_string(),
            ));
        }
        if lease.max_size == 0 {
            return Err(ConfigError::Inconsistent(
                "global max size must be positive".to_string(),
            ));
        }
        if lease.min_duration > lease.max_duration {
            return Err(ConfigError::Inconsistent(format!(
                "min duration {}s exceeds max duration {}s",
                lease.min_duration, lease.max_duration
            )));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_allocation(var: &'static str, item: &str) -> Result<(Address, Amount), ConfigError> {
    let (address, amount) = item.split_once('=').ok_or_else(|| ConfigError::Invalid {
        var,
        value: item.to_string(),
        reason: "expected address=amount".to_string(),
    })?;
    Ok((parse(var, address)?, parse(var, amount)?))
}
