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

//! User directory and restaurant catalog collaborators.
//!
//! Both are consumed through traits so a persistent store can be plugged in;
//! the in-memory implementations back the simulator, the demo server and tests.

use crate::base::{DishId, RestaurantId, UserId};
use crate::geo::GeoPoint;
use crate::DeliveryError;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Customer,
    Driver,
    RestaurantOwner,
    Platform,
}

/// Driver availability as seen by dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriverStatus {
    Online,
    Busy,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: RestaurantId,
    pub owner: UserId,
    pub name: String,
    pub location: GeoPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dish {
    pub id: DishId,
    pub restaurant: RestaurantId,
    pub name: String,
    /// Authoritative unit price. Client-submitted prices are never used.
    pub price: Decimal,
    pub available: bool,
}

pub trait UserDirectory: Send + Sync {
    fn user(&self, id: UserId) -> Option<UserProfile>;

    fn user_by_email(&self, email: &str) -> Option<UserProfile>;

    fn driver_status(&self, id: UserId) -> Option<DriverStatus>;

    /// Atomically moves a driver from `Online` to `Busy`.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::NotFound`] if the driver is unknown or not online.
    fn reserve_driver(&self, id: UserId) -> Result<(), DeliveryError>;

    /// Returns a busy driver to `Online`. Offline drivers stay offline.
    fn release_driver(&self, id: UserId);
}

pub trait Catalog: Send + Sync {
    fn restaurant(&self, id: RestaurantId) -> Option<Restaurant>;

    fn dish(&self, id: DishId) -> Option<Dish>;
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: DashMap<UserId, UserProfile>,
    by_email: DashMap<String, UserId>,
    drivers: DashMap<UserId, DriverStatus>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, profile: UserProfile) {
        self.by_email
            .insert(profile.email.to_lowercase(), profile.id);
        if profile.role == Role::Driver {
            self.drivers.entry(profile.id).or_insert(DriverStatus::Offline);
        }
        self.users.insert(profile.id, profile);
    }

    pub fn set_driver_status(&self, id: UserId, status: DriverStatus) -> Result<(), DeliveryError> {
        let mut entry = self
            .drivers
            .get_mut(&id)
            .ok_or_else(|| DeliveryError::not_found(format!("driver {id}")))?;
        *entry = status;
        Ok(())
    }
}

impl UserDirectory for InMemoryDirectory {
    fn user(&self, id: UserId) -> Option<UserProfile> {
        self.users.get(&id).map(|u| u.clone())
    }

    fn user_by_email(&self, email: &str) -> Option<UserProfile> {
        let id = *self.by_email.get(&email.to_lowercase())?;
        self.user(id)
    }

    fn driver_status(&self, id: UserId) -> Option<DriverStatus> {
        self.drivers.get(&id).map(|s| *s)
    }

    fn reserve_driver(&self, id: UserId) -> Result<(), DeliveryError> {
        match self.drivers.get_mut(&id) {
            Some(mut status) if *status == DriverStatus::Online => {
                *status = DriverStatus::Busy;
                Ok(())
            }
            Some(status) => Err(DeliveryError::not_found(format!(
                "driver {id} is not available ({:?})",
                *status
            ))),
            None => Err(DeliveryError::not_found(format!("driver {id}"))),
        }
    }

    fn release_driver(&self, id: UserId) {
        if let Some(mut status) = self.drivers.get_mut(&id) {
            if *status == DriverStatus::Busy {
                *status = DriverStatus::Online;
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    restaurants: DashMap<RestaurantId, Restaurant>,
    dishes: DashMap<DishId, Dish>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_restaurant(&self, restaurant: Restaurant) {
        self.restaurants.insert(restaurant.id, restaurant);
    }

    pub fn add_dish(&self, dish: Dish) {
        self.dishes.insert(dish.id, dish);
    }
}

impl Catalog for InMemoryCatalog {
    fn restaurant(&self, id: RestaurantId) -> Option<Restaurant> {
        self.restaurants.get(&id).map(|r| r.clone())
    }

    fn dish(&self, id: DishId) -> Option<Dish> {
        self.dishes.get(&id).map(|d| d.clone())
    }
}
