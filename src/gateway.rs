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

//! External payment gateway: signed redirect URLs and callback verification.
//!
//! Parameters are canonicalised by sorting keys and form-encoding the
//! non-empty values; the canonical string is signed with HMAC-SHA512 and the
//! hex digest travels as `secure_hash`.

use crate::base::OrderId;
use crate::DeliveryError;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::Sha512;
use std::collections::BTreeMap;

type HmacSha512 = Hmac<Sha512>;

pub const SECURE_HASH: &str = "secure_hash";
pub const SECURE_HASH_TYPE: &str = "secure_hash_type";
/// Gateway response code for a captured payment.
pub const RESPONSE_SUCCESS: &str = "00";

/// Parameter set exchanged with the gateway.
pub type GatewayParams = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct GatewaySigner {
    secret: String,
}

impl GatewaySigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Sorted, form-encoded `key=value` pairs, excluding signature fields and
    /// empty values.
    pub fn canonical(params: &GatewayParams) -> Result<String, DeliveryError> {
        let signed: Vec<(&str, &str)> = params
            .iter()
            .filter(|(k, v)| !v.is_empty() && k.as_str() != SECURE_HASH && k.as_str() != SECURE_HASH_TYPE)
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        serde_urlencoded::to_string(signed)
            .map_err(|e| DeliveryError::validation(format!("cannot encode gateway params: {e}")))
    }

    fn mac(&self, canonical: &str) -> Result<HmacSha512, DeliveryError> {
        let mut mac = HmacSha512::new_from_slice(self.secret.as_bytes())
            .map_err(|_| DeliveryError::validation("gateway secret is unusable"))?;
        mac.update(canonical.as_bytes());
        Ok(mac)
    }

    /// Hex HMAC-SHA512 over the canonical parameter string.
    pub fn sign(&self, params: &GatewayParams) -> Result<String, DeliveryError> {
        let canonical = Self::canonical(params)?;
        Ok(hex::encode(self.mac(&canonical)?.finalize().into_bytes()))
    }

    /// Re-derives the signature over `params` and compares it in constant time
    /// with the `secure_hash` they carry.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::SignatureInvalid`] if the hash is missing, malformed or
    /// does not match.
    pub fn verify(&self, params: &GatewayParams) -> Result<(), DeliveryError> {
        let provided = params
            .get(SECURE_HASH)
            .ok_or(DeliveryError::SignatureInvalid)?;
        let provided = hex::decode(provided.to_ascii_lowercase())
            .map_err(|_| DeliveryError::SignatureInvalid)?;
        let canonical = Self::canonical(params)?;
        self.mac(&canonical)?
            .verify_slice(&provided)
            .map_err(|_| DeliveryError::SignatureInvalid)
    }
}

/// Converts a decimal amount into gateway minor units (x100, integer).
pub fn to_minor_units(amount: Decimal) -> Decimal {
    (amount * Decimal::ONE_HUNDRED).round()
}

pub fn from_minor_units(minor: Decimal) -> Decimal {
    minor / Decimal::ONE_HUNDRED
}

/// A signed payment request, ready for redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub order: OrderId,
    pub amount: Decimal,
    pub params: GatewayParams,
    pub url: String,
}

/// Verified fields of a gateway callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayCallback {
    pub order: OrderId,
    pub amount: Decimal,
    pub response_code: String,
    pub transaction_no: Option<String>,
}

impl GatewayCallback {
    pub fn is_success(&self) -> bool {
        self.response_code == RESPONSE_SUCCESS
    }

    /// Extracts the callback fields. Call only after signature verification.
    pub fn from_params(params: &GatewayParams) -> Result<Self, DeliveryError> {
        let field = |key: &str| {
            params
                .get(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| DeliveryError::validation(format!("callback is missing {key}")))
        };

        let order = field("txn_ref")?
            .parse::<u64>()
            .map(OrderId)
            .map_err(|_| DeliveryError::validation("callback txn_ref is not an order id"))?;
        let minor = field("amount")?
            .parse::<Decimal>()
            .map_err(|_| DeliveryError::validation("callback amount is not numeric"))?;

        Ok(Self {
            order,
            amount: from_minor_units(minor),
            response_code: field("response_code")?.clone(),
            transaction_no: params.get("transaction_no").cloned(),
        })
    }
}

/// Network side of the gateway: registers a session before redirect.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn open_session(&self, request: &PaymentRequest) -> Result<(), DeliveryError>;
}

/// Hosted payment page that needs no pre-registration; the signed URL is the session.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostedPaymentPage;

#[async_trait]
impl PaymentGateway for HostedPaymentPage {
    async fn open_session(&self, _request: &PaymentRequest) -> Result<(), DeliveryError> {
        Ok(())
    }
}
