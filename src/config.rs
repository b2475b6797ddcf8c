// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Runtime configuration.
//!
//! Every field has a production default and can be overridden from the
//! environment:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `DELIVERY_BASE_FEE` | 15000 | Flat delivery fee |
//! | `DELIVERY_BASE_DISTANCE_KM` | 3 | Distance covered by the flat fee |
//! | `DELIVERY_PER_KM_FEE` | 5000 | Fee per km beyond the base distance |
//! | `DELIVERY_SURGE` | 1.0 | Surge multiplier when no demand signal is given |
//! | `DELIVERY_COMMISSION_RATE` | 0.15 | Platform share of the subtotal |
//! | `DELIVERY_COD_CEILING` | 2000000 | Max COD order amount per driver |
//! | `DELIVERY_GATEWAY_MERCHANT` | DEMO0001 | Gateway merchant code |
//! | `DELIVERY_GATEWAY_SECRET` | (dev secret) | Gateway HMAC secret |
//! | `DELIVERY_GATEWAY_URL` | sandbox URL | Gateway payment page |
//! | `DELIVERY_GATEWAY_TIMEOUT_MS` | 10000 | Gateway session deadline |
//! | `DELIVERY_CHANNEL_CAPACITY` | 256 | Realtime channel buffer |
//! | `DELIVERY_CHAT_CACHE` | 50 | Recent chat messages cached per order |
//! | `DELIVERY_LOCATION_TTL_SECS` | 86400 | Driver location lifetime |
//! | `DELIVERY_SWEEP_INTERVAL_SECS` | 60 | Expired-location sweep period |

use crate::base::UserId;
use chrono::TimeDelta;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Delivery fee parameters.
#[derive(Debug, Clone)]
pub struct PricingConfig {
    pub base_fee: Decimal,
    pub base_distance_km: Decimal,
    pub per_km_fee: Decimal,
    pub default_surge: Decimal,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_fee: dec!(15000),
            base_distance_km: dec!(3),
            per_km_fee: dec!(5000),
            default_surge: dec!(1.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommissionConfig {
    /// Fraction of the subtotal kept by the platform.
    pub rate: Decimal,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self { rate: dec!(0.15) }
    }
}

/// Cash-on-delivery limits.
#[derive(Debug, Clone)]
pub struct CodConfig {
    pub default_ceiling: Decimal,
    /// Per-driver ceilings that replace the default.
    pub overrides: HashMap<UserId, Decimal>,
}

impl CodConfig {
    pub fn ceiling_for(&self, driver: UserId) -> Decimal {
        self.overrides
            .get(&driver)
            .copied()
            .unwrap_or(self.default_ceiling)
    }
}

impl Default for CodConfig {
    fn default() -> Self {
        Self {
            default_ceiling: dec!(2000000),
            overrides: HashMap::new(),
        }
    }
}

/// External payment gateway settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub merchant_code: String,
    pub hash_secret: String,
    pub pay_url: String,
    /// Appended to the caller's base URL to form the return URL.
    pub return_path: String,
    pub currency: String,
    pub locale: String,
    pub version: String,
    pub command: String,
    pub order_type: String,
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            merchant_code: "DEMO0001".into(),
            hash_secret: "dev-only-secret-change-me".into(),
            pay_url: "https://sandbox.gateway.example/paymentv2/vpcpay.html".into(),
            return_path: "/payments/gateway/callback".into(),
            currency: "VND".into(),
            locale: "vn".into(),
            version: "2.1.0".into(),
            command: "pay".into(),
            order_type: "other".into(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub channel_capacity: usize,
    pub chat_cache_window: usize,
    pub max_chat_length: usize,
    pub max_history_page: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            chat_cache_window: 50,
            max_chat_length: 2000,
            max_history_page: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeoConfig {
    pub location_ttl: TimeDelta,
    pub sweep_interval: Duration,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            location_ttl: TimeDelta::hours(24),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub pricing: PricingConfig,
    pub commission: CommissionConfig,
    pub cod: CodConfig,
    pub gateway: GatewayConfig,
    pub realtime: RealtimeConfig,
    pub geo: GeoConfig,
}

impl Config {
    /// Loads configuration from `DELIVERY_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    ///
    /// Missing or unparsable values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string());

        let gateway_timeout_ms = parsed(&get, "DELIVERY_GATEWAY_TIMEOUT_MS")
            .unwrap_or(defaults.gateway.timeout.as_millis() as u64);
        let ttl_secs = parsed(&get, "DELIVERY_LOCATION_TTL_SECS")
            .unwrap_or(defaults.geo.location_ttl.num_seconds());
        let sweep_secs = parsed(&get, "DELIVERY_SWEEP_INTERVAL_SECS")
            .unwrap_or(defaults.geo.sweep_interval.as_secs());

        Config {
            pricing: PricingConfig {
                base_fee: parsed(&get, "DELIVERY_BASE_FEE").unwrap_or(defaults.pricing.base_fee),
                base_distance_km: parsed(&get, "DELIVERY_BASE_DISTANCE_KM")
                    .unwrap_or(defaults.pricing.base_distance_km),
                per_km_fee: parsed(&get, "DELIVERY_PER_KM_FEE")
                    .unwrap_or(defaults.pricing.per_km_fee),
                default_surge: parsed(&get, "DELIVERY_SURGE")
                    .unwrap_or(defaults.pricing.default_surge),
            },
            commission: CommissionConfig {
                rate: parsed(&get, "DELIVERY_COMMISSION_RATE").unwrap_or(defaults.commission.rate),
            },
            cod: CodConfig {
                default_ceiling: parsed(&get, "DELIVERY_COD_CEILING")
                    .unwrap_or(defaults.cod.default_ceiling),
                overrides: HashMap::new(),
            },
            gateway: GatewayConfig {
                merchant_code: get("DELIVERY_GATEWAY_MERCHANT")
                    .unwrap_or(defaults.gateway.merchant_code),
                hash_secret: get("DELIVERY_GATEWAY_SECRET").unwrap_or(defaults.gateway.hash_secret),
                pay_url: get("DELIVERY_GATEWAY_URL").unwrap_or(defaults.gateway.pay_url),
                timeout: Duration::from_millis(gateway_timeout_ms),
                ..defaults.gateway
            },
            realtime: RealtimeConfig {
                channel_capacity: parsed(&get, "DELIVERY_CHANNEL_CAPACITY")
                    .filter(|c: &usize| *c > 0)
                    .unwrap_or(defaults.realtime.channel_capacity),
                chat_cache_window: parsed(&get, "DELIVERY_CHAT_CACHE")
                    .unwrap_or(defaults.realtime.chat_cache_window),
                ..defaults.realtime
            },
            geo: GeoConfig {
                location_ttl: TimeDelta::try_seconds(ttl_secs).unwrap_or(defaults.geo.location_ttl),
                sweep_interval: Duration::from_secs(sweep_secs),
            },
        }
    }
}

fn parsed<T, G>(get: &G, key: &str) -> Option<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(key).and_then(|raw| raw.parse().ok())
}
