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

//! Last-known driver positions with a time-to-live.
//!
//! Each driver has at most one record; an update overwrites it and restarts
//! the TTL. Reads never return a record older than the TTL: expired entries
//! are evicted on read, and [`GeoStore::purge_expired`] clears the rest.

use crate::base::UserId;
use crate::clock::Clock;
use crate::geo::GeoPoint;
use crate::DeliveryError;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverLocation {
    pub driver: UserId,
    pub position: GeoPoint,
    pub recorded_at: DateTime<Utc>,
}

/// A driver found by [`GeoStore::find_nearby`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NearbyDriver {
    pub location: DriverLocation,
    pub distance_km: f64,
}

pub struct GeoStore {
    locations: DashMap<UserId, DriverLocation>,
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl GeoStore {
    pub fn new(ttl: TimeDelta, clock: Arc<dyn Clock>) -> Self {
        Self {
            locations: DashMap::new(),
            ttl,
            clock,
        }
    }

    fn is_expired(&self, record: &DriverLocation, now: DateTime<Utc>) -> bool {
        now - record.recorded_at >= self.ttl
    }

    /// Records a driver's position, replacing any earlier one.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::Validation`] for out-of-range coordinates.
    pub fn update_location(
        &self,
        driver: UserId,
        lat: f64,
        lng: f64,
    ) -> Result<DriverLocation, DeliveryError> {
        let record = DriverLocation {
            driver,
            position: GeoPoint::new(lat, lng)?,
            recorded_at: self.clock.now(),
        };
        self.locations.insert(driver, record);
        Ok(record)
    }

    pub fn get_location(&self, driver: UserId) -> Option<DriverLocation> {
        let now = self.clock.now();
        let record = *self.locations.get(&driver)?;
        if self.is_expired(&record, now) {
            // Only evict if nothing newer landed in between.
            self.locations
                .remove_if(&driver, |_, r| self.is_expired(r, now));
            debug!(driver = %driver, "location expired");
            return None;
        }
        Some(record)
    }

    /// Drivers within `radius_km` of a point, nearest first.
    pub fn find_nearby(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
    ) -> Result<Vec<NearbyDriver>, DeliveryError> {
        let origin = GeoPoint::new(lat, lng)?;
        if !radius_km.is_finite() || radius_km < 0.0 {
            return Err(DeliveryError::validation(format!(
                "radius {radius_km} must be a non-negative distance"
            )));
        }
        let now = self.clock.now();

        let mut nearby: Vec<NearbyDriver> = self
            .locations
            .iter()
            .filter(|r| !self.is_expired(r.value(), now))
            .map(|r| NearbyDriver {
                location: *r.value(),
                distance_km: origin.distance_km(&r.position),
            })
            .filter(|n| n.distance_km <= radius_km)
            .collect();
        nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        Ok(nearby)
    }

    /// Drops every expired record, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.locations.len();
        self.locations.retain(|_, r| !self.is_expired(r, now));
        let purged = before.saturating_sub(self.locations.len());
        if purged > 0 {
            debug!(purged, "expired driver locations purged");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Runs [`purge_expired`](Self::purge_expired) every `interval` until aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                store.purge_expired();
            }
        })
    }
}
