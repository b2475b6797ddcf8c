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

//! Shared fixtures for the integration tests.
//!
//! Prices are chosen so that the standard order (two of dish 1, two of dish 2,
//! delivered at the restaurant's door) has subtotal 100.00, delivery fee 20.00
//! and total 120.00.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use delivery_core_rs::chat::InMemoryChatLog;
use delivery_core_rs::config::{CodConfig, CommissionConfig, GatewayConfig, PricingConfig};
use delivery_core_rs::directory::{
    Dish, DriverStatus, InMemoryCatalog, InMemoryDirectory, Restaurant, Role, UserProfile,
};
use delivery_core_rs::gateway::{HostedPaymentPage, PaymentGateway, PaymentRequest};
use delivery_core_rs::{
    ChatLog, Collaborators, Config, DeliveryAddress, DeliveryError, DishId, GeoPoint, Identity,
    Ledger, ManualClock, NewOrder, Order, OrderBook, OrderId, OrderItem, OrderStatus,
    PaymentDispatcher, PaymentMethod, Platform, RestaurantId, UserId,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const PLATFORM: UserId = UserId(1);
pub const OWNER: UserId = UserId(2);
pub const CUSTOMER: UserId = UserId(10);
pub const DRIVER: UserId = UserId(20);
pub const SECOND_DRIVER: UserId = UserId(21);
pub const STRANGER: UserId = UserId(30);
pub const RESTAURANT: RestaurantId = RestaurantId(1);
pub const GATEWAY_SECRET: &str = "test-secret";

pub fn customer() -> Identity {
    Identity::user(CUSTOMER, "customer@example.com")
}

pub fn driver() -> Identity {
    Identity::user(DRIVER, "driver@example.com")
}

pub fn stranger() -> Identity {
    Identity::user(STRANGER, "stranger@example.com")
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_750_000_000, 0).unwrap_or_default()
}

pub fn test_config() -> Config {
    Config {
        pricing: PricingConfig {
            base_fee: dec!(20.00),
            base_distance_km: dec!(3),
            per_km_fee: dec!(0.50),
            default_surge: dec!(1.0),
        },
        commission: CommissionConfig { rate: dec!(0.15) },
        cod: CodConfig {
            default_ceiling: dec!(500),
            overrides: HashMap::from([(SECOND_DRIVER, dec!(50))]),
        },
        gateway: GatewayConfig {
            hash_secret: GATEWAY_SECRET.into(),
            timeout: Duration::from_millis(100),
            ..GatewayConfig::default()
        },
        ..Config::default()
    }
}

pub fn restaurant_location() -> GeoPoint {
    GeoPoint::new(10.0, 20.0).unwrap()
}

pub fn seed_directory() -> Arc<InMemoryDirectory> {
    let directory = Arc::new(InMemoryDirectory::new());
    let users = [
        (PLATFORM, "platform@example.com", Role::Platform),
        (OWNER, "owner@example.com", Role::RestaurantOwner),
        (CUSTOMER, "customer@example.com", Role::Customer),
        (DRIVER, "driver@example.com", Role::Driver),
        (SECOND_DRIVER, "driver2@example.com", Role::Driver),
        (STRANGER, "stranger@example.com", Role::Customer),
    ];
    for (id, email, role) in users {
        directory.add_user(UserProfile {
            id,
            name: email.split('@').next().unwrap_or_default().to_string(),
            email: email.into(),
            role,
        });
    }
    directory
        .set_driver_status(DRIVER, DriverStatus::Online)
        .unwrap();
    directory
        .set_driver_status(SECOND_DRIVER, DriverStatus::Online)
        .unwrap();
    directory
}

pub fn seed_catalog() -> Arc<InMemoryCatalog> {
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.add_restaurant(Restaurant {
        id: RESTAURANT,
        owner: OWNER,
        name: "Pho 24".into(),
        location: restaurant_location(),
    });
    catalog.add_dish(Dish {
        id: DishId(1),
        restaurant: RESTAURANT,
        name: "Pho bo".into(),
        price: dec!(40.00),
        available: true,
    });
    catalog.add_dish(Dish {
        id: DishId(2),
        restaurant: RESTAURANT,
        name: "Iced coffee".into(),
        price: dec!(10.00),
        available: true,
    });
    catalog
}

/// Gateway whose session call never answers in time.
pub struct SlowGateway;

#[async_trait]
impl PaymentGateway for SlowGateway {
    async fn open_session(&self, _request: &PaymentRequest) -> Result<(), DeliveryError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }
}

/// Chat log that rejects every write.
pub struct FailingChatLog;

#[async_trait]
impl ChatLog for FailingChatLog {
    async fn append(
        &self,
        _message: &delivery_core_rs::ChatMessage,
    ) -> Result<(), DeliveryError> {
        Err(DeliveryError::InvalidState("chat store offline".into()))
    }

    async fn count(&self, _order: OrderId) -> Result<usize, DeliveryError> {
        Ok(0)
    }

    async fn range(
        &self,
        _order: OrderId,
        _offset: usize,
        _limit: usize,
    ) -> Result<Vec<delivery_core_rs::ChatMessage>, DeliveryError> {
        Ok(Vec::new())
    }
}

/// Order book wired to in-memory collaborators and a manual clock.
pub struct Fixture {
    pub clock: Arc<ManualClock>,
    pub directory: Arc<InMemoryDirectory>,
    pub catalog: Arc<InMemoryCatalog>,
    pub ledger: Arc<Ledger>,
    pub payments: Arc<PaymentDispatcher>,
    pub orders: Arc<OrderBook>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_gateway(Arc::new(HostedPaymentPage))
    }

    pub fn with_gateway(gateway: Arc<dyn PaymentGateway>) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let config = Arc::new(test_config());
        let directory = seed_directory();
        let catalog = seed_catalog();
        let ledger = Arc::new(Ledger::new(clock.clone()));
        let payments = Arc::new(PaymentDispatcher::new(
            ledger.clone(),
            catalog.clone(),
            gateway,
            config.clone(),
            PLATFORM,
            clock.clone(),
        ));
        let orders = Arc::new(OrderBook::new(
            catalog.clone(),
            directory.clone(),
            payments.clone(),
            config,
            clock.clone(),
        ));
        Self {
            clock,
            directory,
            catalog,
            ledger,
            payments,
            orders,
        }
    }

    pub fn place(&self, method: PaymentMethod, items: Vec<OrderItem>) -> Result<Order, DeliveryError> {
        self.orders.create_order(NewOrder {
            customer: CUSTOMER,
            restaurant: RESTAURANT,
            items,
            address: DeliveryAddress {
                street: "1 Nguyen Hue".into(),
                location: restaurant_location(),
            },
            payment_method: method,
            surge: None,
        })
    }

    /// Subtotal 100.00, fee 20.00, total 120.00.
    pub fn standard_order(&self, method: PaymentMethod) -> Order {
        self.place(method, standard_items()).unwrap()
    }

    /// Subtotal 30.00, fee 20.00, total 50.00.
    pub fn small_order(&self, method: PaymentMethod) -> Order {
        self.place(
            method,
            vec![OrderItem {
                dish: DishId(2),
                quantity: 3,
            }],
        )
        .unwrap()
    }

    /// Balance of a user's wallet, zero when they have none yet.
    pub fn balance_of(&self, owner: UserId) -> Decimal {
        self.ledger
            .wallet_for(owner)
            .map(|w| self.ledger.balance(w).unwrap())
            .unwrap_or(Decimal::ZERO)
    }

    /// Assigns `DRIVER` and walks the order forward until it reaches `target`.
    pub fn walk_to(&self, order: OrderId, target: OrderStatus) -> Order {
        let mut current = self.orders.get(order).unwrap();
        if current.status == OrderStatus::Created && target != OrderStatus::Created {
            current = self.orders.assign_driver(order, DRIVER).unwrap();
        }
        while current.status < target {
            let next = current.status.next().unwrap();
            current = self.orders.update_status(order, next).unwrap();
        }
        current
    }
}

pub fn standard_items() -> Vec<OrderItem> {
    vec![
        OrderItem {
            dish: DishId(1),
            quantity: 2,
        },
        OrderItem {
            dish: DishId(2),
            quantity: 2,
        },
    ]
}

/// Full platform over the same collaborators. Must be built inside a tokio runtime.
pub fn platform_with_log(chat_log: Arc<dyn ChatLog>) -> (Platform, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_time()));
    let platform = Platform::new(
        test_config(),
        Collaborators {
            directory: seed_directory(),
            catalog: seed_catalog(),
            gateway: Arc::new(HostedPaymentPage),
            chat_log,
            clock: clock.clone(),
            platform_owner: PLATFORM,
        },
    );
    (platform, clock)
}

pub fn platform() -> (Platform, Arc<ManualClock>) {
    platform_with_log(Arc::new(InMemoryChatLog::new()))
}

/// Places the standard order as the customer and assigns `DRIVER`.
pub fn assigned_order(platform: &Platform, method: PaymentMethod) -> Order {
    let order = platform
        .place_order(
            &customer(),
            NewOrder {
                customer: CUSTOMER,
                restaurant: RESTAURANT,
                items: standard_items(),
                address: DeliveryAddress {
                    street: "1 Nguyen Hue".into(),
                    location: restaurant_location(),
                },
                payment_method: method,
                surge: None,
            },
        )
        .unwrap();
    platform.assign_driver(order.id, DRIVER).unwrap()
}
