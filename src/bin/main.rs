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

use clap::Parser;
use csv::Writer;
use delivery_core_rs::chat::InMemoryChatLog;
use delivery_core_rs::directory::{
    Dish, DriverStatus, InMemoryCatalog, InMemoryDirectory, Restaurant, Role, UserProfile,
};
use delivery_core_rs::gateway::{GatewayParams, GatewaySigner, HostedPaymentPage, SECURE_HASH};
use delivery_core_rs::logging::init_tracing;
use delivery_core_rs::{
    Collaborators, Config, DeliveryAddress, DeliveryError, DishId, GeoPoint, Identity, Ledger,
    NewOrder, OrderItem, OrderStatus, PaymentMethod, Platform, RestaurantId, SystemClock, UserId,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::io::Write;
use std::process;
use std::sync::Arc;
use tracing::{info, warn};

/// Delivery simulator - runs concurrent orders end to end
///
/// Places orders for simulated customers, walks drivers through every
/// status with live location and chat, settles by wallet, cash or gateway,
/// and prints the resulting wallets as CSV on stdout.
#[derive(Parser, Debug, Clone)]
#[command(name = "delivery-sim")]
#[command(about = "Simulates food-delivery orders and prints the wallet ledger", long_about = None)]
struct Args {
    /// Number of simulated customers
    #[arg(long, default_value_t = 20)]
    customers: u32,

    /// Number of simulated drivers (orders per concurrent batch)
    #[arg(long, default_value_t = 5)]
    drivers: u32,

    /// Total orders to run
    #[arg(long, default_value_t = 50)]
    orders: usize,

    /// Starting wallet balance for each customer
    #[arg(long, default_value_t = dec!(2000000))]
    funds: Decimal,

    /// Cancel every Nth order at pickup (0 disables)
    #[arg(long, default_value_t = 7)]
    cancel_every: usize,
}

const PLATFORM_OWNER: UserId = UserId(1);
const CUSTOMER_BASE: u32 = 100;
const DRIVER_BASE: u32 = 1000;

#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    delivered: usize,
    cancelled: usize,
    failed: usize,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing("warn");

    let config = Config::from_env();
    let (platform, summary) = match simulate(&args, config).await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Error setting up simulation: {}", e);
            process::exit(1);
        }
    };
    info!(?summary, "simulation finished");

    if let Err(e) = write_wallets(platform.ledger(), std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

fn customer(n: u32) -> Identity {
    Identity::user(UserId(CUSTOMER_BASE + n), format!("customer{n}@example.com"))
}

fn driver(n: u32) -> Identity {
    Identity::user(UserId(DRIVER_BASE + n), format!("driver{n}@example.com"))
}

fn seed(args: &Args) -> Result<(Arc<InMemoryDirectory>, Arc<InMemoryCatalog>), DeliveryError> {
    let directory = Arc::new(InMemoryDirectory::new());
    let catalog = Arc::new(InMemoryCatalog::new());

    let profile = |identity: &Identity, name: String, role| {
        identity.id().map(|id| UserProfile {
            id,
            name,
            email: identity.email().unwrap_or_default().to_string(),
            role,
        })
    };
    for n in 0..args.customers {
        if let Some(p) = profile(&customer(n), format!("Customer {n}"), Role::Customer) {
            directory.add_user(p);
        }
    }
    for n in 0..args.drivers {
        if let Some(p) = profile(&driver(n), format!("Driver {n}"), Role::Driver) {
            let id = p.id;
            directory.add_user(p);
            directory.set_driver_status(id, DriverStatus::Online)?;
        }
    }

    for (r, (lat, lng)) in [(10.7769, 106.7009), (10.7626, 106.6602)].into_iter().enumerate() {
        let restaurant = RestaurantId(r as u32 + 1);
        let owner = UserId(r as u32 + 2);
        directory.add_user(UserProfile {
            id: owner,
            name: format!("Owner {}", r + 1),
            email: format!("owner{}@example.com", r + 1),
            role: Role::RestaurantOwner,
        });
        catalog.add_restaurant(Restaurant {
            id: restaurant,
            owner,
            name: format!("Kitchen {}", r + 1),
            location: GeoPoint::new(lat, lng)?,
        });
        for d in 0..3u32 {
            catalog.add_dish(Dish {
                id: DishId(restaurant.0 * 10 + d),
                restaurant,
                name: format!("Dish {}-{d}", restaurant),
                price: Decimal::from(35000 + 10000 * d),
                available: true,
            });
        }
    }
    Ok((directory, catalog))
}

/// Runs the simulation and returns the platform (shut down) for reporting.
async fn simulate(args: &Args, config: Config) -> Result<(Arc<Platform>, Summary), DeliveryError> {
    let (directory, catalog) = seed(args)?;
    let secret = config.gateway.hash_secret.clone();
    let platform = Arc::new(Platform::new(
        config,
        Collaborators {
            directory,
            catalog,
            gateway: Arc::new(HostedPaymentPage),
            chat_log: Arc::new(InMemoryChatLog::new()),
            clock: Arc::new(SystemClock),
            platform_owner: PLATFORM_OWNER,
        },
    ));
    for n in 0..args.customers {
        platform
            .ledger()
            .deposit(UserId(CUSTOMER_BASE + n), args.funds)?;
    }

    let mut summary = Summary::default();
    let batch = args.drivers.max(1) as usize;
    let customers = args.customers.max(1);
    let mut next = 0;
    while next < args.orders {
        let mut tasks = Vec::with_capacity(batch);
        for slot in 0..batch.min(args.orders - next) {
            let n = next + slot;
            let platform = Arc::clone(&platform);
            let customer = customer(n as u32 % customers);
            let driver = driver(slot as u32);
            let cancel = args.cancel_every > 0 && (n + 1) % args.cancel_every == 0;
            let secret = secret.clone();
            tasks.push(tokio::spawn(async move {
                run_order(&platform, n, &customer, &driver, cancel, &secret).await
            }));
        }
        next += tasks.len();

        for task in tasks {
            match task.await {
                Ok(Ok(OrderStatus::Delivered)) => summary.delivered += 1,
                Ok(Ok(_)) => summary.cancelled += 1,
                Ok(Err(e)) => {
                    warn!(error = %e, "simulated order failed");
                    summary.failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "simulated order panicked");
                    summary.failed += 1;
                }
            }
        }
    }

    platform.shutdown().await;
    Ok((platform, summary))
}

fn method_for(n: usize) -> PaymentMethod {
    match n % 5 {
        0 => PaymentMethod::Gateway,
        1 | 3 => PaymentMethod::Wallet,
        _ => PaymentMethod::Cod,
    }
}

async fn run_order(
    platform: &Platform,
    n: usize,
    customer: &Identity,
    driver: &Identity,
    cancel: bool,
    secret: &str,
) -> Result<OrderStatus, DeliveryError> {
    let restaurant = RestaurantId(n as u32 % 2 + 1);
    let offset = (n % 10) as f64 * 0.01;
    let order = platform.place_order(
        customer,
        NewOrder {
            customer: customer.id().unwrap_or(UserId(0)),
            restaurant,
            items: vec![
                OrderItem {
                    dish: DishId(restaurant.0 * 10),
                    quantity: 1 + (n % 3) as u32,
                },
                OrderItem {
                    dish: DishId(restaurant.0 * 10 + 2),
                    quantity: 1,
                },
            ],
            address: DeliveryAddress {
                street: format!("{n} Nguyen Hue"),
                location: GeoPoint::new(10.80 + offset, 106.70 + offset)?,
            },
            payment_method: method_for(n),
            surge: None,
        },
    )?;

    if order.payment_method == PaymentMethod::Gateway {
        let request = platform
            .payment_url(customer, order.id, "127.0.0.1", "http://localhost:3000")
            .await?;
        let mut params = GatewayParams::new();
        params.insert("txn_ref".into(), order.id.to_string());
        params.insert(
            "amount".into(),
            request.params.get("amount").cloned().unwrap_or_default(),
        );
        params.insert("response_code".into(), "00".into());
        params.insert("transaction_no".into(), format!("SIM-{n}"));
        let signature = GatewaySigner::new(secret).sign(&params)?;
        params.insert(SECURE_HASH.into(), signature);
        platform.gateway_callback(&params)?;
    }

    let driver_id = driver.id().unwrap_or(UserId(0));
    platform.assign_driver(order.id, driver_id)?;
    let _ = platform.send_chat(customer, order.id, "Please ring the bell")?;

    for (step, status) in OrderStatus::CHAIN.into_iter().skip(2).enumerate() {
        if cancel && status == OrderStatus::PickedUp {
            platform.cancel(customer, order.id, "changed my mind")?;
            return Ok(OrderStatus::Cancelled);
        }
        let progress = step as f64 * 0.002;
        platform.report_location(driver, order.id, 10.78 + progress, 106.70 + progress)?;
        platform.advance(driver, order.id, status)?;
    }
    Ok(platform.orders().get(order.id)?.status)
}

/// Write wallet states to a CSV writer
///
/// # CSV Format
///
/// Columns: `wallet, owner, balance, transactions`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
fn write_wallets<W: Write>(ledger: &Ledger, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for wallet in ledger.wallets() {
        wtr.serialize(wallet.as_ref())?;
    }
    wtr.flush()?;
    Ok(())
}
