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

//! Caller identity and the per-order access check.

use crate::base::{OrderId, UserId};
use crate::order::OrderStatus;
use serde::{Deserialize, Serialize};

/// Who is calling. Passed explicitly into every party-facing operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    Anonymous,
    User { id: UserId, email: String },
}

impl Identity {
    pub fn user(id: UserId, email: impl Into<String>) -> Self {
        Identity::User {
            id,
            email: email.into(),
        }
    }

    pub fn id(&self) -> Option<UserId> {
        match self {
            Identity::Anonymous => None,
            Identity::User { id, .. } => Some(*id),
        }
    }

    /// The caller's email, `None` when anonymous or blank.
    pub fn email(&self) -> Option<&str> {
        match self {
            Identity::User { email, .. } if !email.trim().is_empty() => Some(email.trim()),
            _ => None,
        }
    }
}

/// The two users entitled to an order's live data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parties {
    pub order: OrderId,
    pub customer: UserId,
    pub customer_email: String,
    pub driver: Option<UserId>,
    pub driver_email: Option<String>,
    pub status: OrderStatus,
}

impl Parties {
    /// True iff the caller's email is the customer's or the driver's.
    pub fn authorize(&self, identity: &Identity) -> bool {
        let Some(email) = identity.email() else {
            return false;
        };
        email.eq_ignore_ascii_case(&self.customer_email)
            || self
                .driver_email
                .as_deref()
                .is_some_and(|d| email.eq_ignore_ascii_case(d))
    }

    pub fn is_driver(&self, identity: &Identity) -> bool {
        self.driver.is_some() && identity.id() == self.driver && self.authorize(identity)
    }
}

pub fn authorize(identity: &Identity, parties: &Parties) -> bool {
    parties.authorize(identity)
}
