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

//! Integration tests for the REST API server with concurrent requests.
//!
//! These tests verify that the server keeps every order's state machine and
//! every wallet consistent while many requests race against it.

mod common;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use common::*;
use delivery_core_rs::{
    DeliveryAddress, DeliveryError, HistoryPage, Identity, NewOrder, Order, OrderId, OrderItem,
    OrderStatus, PaymentMethod, PaymentStatus, Platform, PushOutcome, UserId,
};
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::TcpListener;

// === DTOs (duplicated from the demo server for test isolation) ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub items: Vec<OrderItem>,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignRequest {
    pub driver: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    pub page: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletResponse {
    pub owner: UserId,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Server Setup ===

#[derive(Clone)]
pub struct AppState {
    pub platform: Arc<Platform>,
}

fn identity(headers: &HeaderMap) -> Identity {
    let id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u32>().ok());
    let email = headers.get("x-user-email").and_then(|v| v.to_str().ok());
    match (id, email) {
        (Some(id), Some(email)) => Identity::user(UserId(id), email),
        _ => Identity::Anonymous,
    }
}

pub struct AppError(DeliveryError);

impl From<DeliveryError> for AppError {
    fn from(err: DeliveryError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            DeliveryError::Validation(_) | DeliveryError::InvalidAmount => {
                (StatusCode::BAD_REQUEST, "VALIDATION")
            }
            DeliveryError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            DeliveryError::InvalidState(_) => (StatusCode::CONFLICT, "INVALID_STATE"),
            DeliveryError::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            DeliveryError::InsufficientFunds { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_FUNDS")
            }
            DeliveryError::SignatureInvalid => (StatusCode::BAD_REQUEST, "SIGNATURE_INVALID"),
            DeliveryError::Unauthorized => (StatusCode::FORBIDDEN, "UNAUTHORIZED"),
            DeliveryError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

async fn place_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let caller = identity(&headers);
    let order = state.platform.place_order(
        &caller,
        NewOrder {
            customer: caller.id().unwrap_or(UserId(0)),
            restaurant: RESTAURANT,
            items: request.items,
            address: DeliveryAddress {
                street: "1 Nguyen Hue".into(),
                location: restaurant_location(),
            },
            payment_method: request.payment_method,
            surge: None,
        },
    )?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.platform.orders().get(OrderId(id))?))
}

async fn assign_driver(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<AssignRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(
        state
            .platform
            .assign_driver(OrderId(id), UserId(request.driver))?,
    ))
}

async fn update_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    Json(request): Json<StatusRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.platform.advance(
        &identity(&headers),
        OrderId(id),
        request.status,
    )?))
}

async fn cancel_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.platform.cancel(
        &identity(&headers),
        OrderId(id),
        &request.reason,
    )?))
}

async fn send_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<PushOutcome>, AppError> {
    Ok(Json(state.platform.send_chat(
        &identity(&headers),
        OrderId(id),
        &request.text,
    )?))
}

async fn chat_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryPage>, AppError> {
    Ok(Json(
        state
            .platform
            .chat_history(&identity(&headers), OrderId(id), query.page, query.size)
            .await?,
    ))
}

async fn list_wallets(State(state): State<AppState>) -> Json<Vec<WalletResponse>> {
    let wallets = state
        .platform
        .ledger()
        .wallets()
        .iter()
        .map(|wallet| WalletResponse {
            owner: wallet.owner(),
            balance: wallet.balance(),
        })
        .collect();
    Json(wallets)
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(place_order))
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/assign", post(assign_driver))
        .route("/orders/{id}/status", post(update_status))
        .route("/orders/{id}/cancel", post(cancel_order))
        .route("/orders/{id}/chat", post(send_chat).get(chat_history))
        .route("/wallets", get(list_wallets))
        .with_state(state)
}

/// Test server that binds to an ephemeral port.
struct TestServer {
    base_url: String,
    platform: Arc<Platform>,
}

impl TestServer {
    async fn new() -> Self {
        let (platform, _) = platform();
        let platform = Arc::new(platform);
        let app = create_router(AppState {
            platform: platform.clone(),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to be ready by polling with retries
        let client = Client::new();
        let health_url = format!("{}/wallets", base_url);
        for _ in 0..50 {
            match client.get(&health_url).send().await {
                Ok(_) => break,
                Err(_) => tokio::time::sleep(tokio::time::Duration::from_millis(50)).await,
            }
        }

        TestServer { base_url, platform }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

trait AsUser {
    fn as_user(self, id: UserId, email: &str) -> Self;
}

impl AsUser for reqwest::RequestBuilder {
    fn as_user(self, id: UserId, email: &str) -> Self {
        self.header("x-user-id", id.0.to_string())
            .header("x-user-email", email)
    }
}

async fn place(client: &Client, server: &TestServer, method: PaymentMethod) -> Order {
    let response = client
        .post(server.url("/orders"))
        .as_user(CUSTOMER, "customer@example.com")
        .json(&PlaceOrderRequest {
            items: standard_items(),
            payment_method: method,
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    response.json().await.unwrap()
}

// === Tests ===

/// Walks one wallet-paid order from placement to delivery over HTTP.
#[tokio::test]
async fn order_lifecycle_over_http() {
    let server = TestServer::new().await;
    let client = Client::new();
    server
        .platform
        .ledger()
        .deposit(CUSTOMER, dec!(500))
        .unwrap();

    let order = place(&client, &server, PaymentMethod::Wallet).await;
    assert_eq!(order.total, dec!(120.00));

    let response = client
        .post(server.url(&format!("/orders/{}/assign", order.id)))
        .json(&AssignRequest { driver: DRIVER.0 })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    for status in OrderStatus::CHAIN.into_iter().skip(2) {
        let response = client
            .post(server.url(&format!("/orders/{}/status", order.id)))
            .as_user(DRIVER, "driver@example.com")
            .json(&StatusRequest { status })
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "advancing to {status}");
    }

    let delivered: Order = client
        .get(server.url(&format!("/orders/{}", order.id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(delivered.status, OrderStatus::Delivered);
    assert_eq!(delivered.payment_status, PaymentStatus::Paid);

    let wallets: Vec<WalletResponse> = client
        .get(server.url("/wallets"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let customer = wallets.iter().find(|w| w.owner == CUSTOMER).unwrap();
    assert_eq!(customer.balance, dec!(380));
}

/// Non-parties get 403, skipped transitions get 409.
#[tokio::test]
async fn errors_map_to_status_codes() {
    let server = TestServer::new().await;
    let client = Client::new();
    let order = place(&client, &server, PaymentMethod::Cod).await;

    let response = client
        .post(server.url(&format!("/orders/{}/cancel", order.id)))
        .as_user(STRANGER, "stranger@example.com")
        .json(&CancelRequest {
            reason: "prank".into(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: ErrorResponse = response.json().await.unwrap();
    assert_eq!(body.code, "UNAUTHORIZED");

    client
        .post(server.url(&format!("/orders/{}/assign", order.id)))
        .json(&AssignRequest { driver: DRIVER.0 })
        .send()
        .await
        .unwrap();
    let response = client
        .post(server.url(&format!("/orders/{}/status", order.id)))
        .as_user(DRIVER, "driver@example.com")
        .json(&StatusRequest {
            status: OrderStatus::PickedUp,
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = client
        .get(server.url("/orders/999"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// These tests are ignored in CI due to connection limits on some platforms.
// Run manually with: cargo test --test server_test -- --ignored

/// Concurrent placements all succeed with distinct order IDs.
#[tokio::test]
#[ignore = "opens hundreds of connections, may fail in CI"]
async fn concurrent_order_placement() {
    let server = Arc::new(TestServer::new().await);
    let client = Client::new();

    const NUM_ORDERS: usize = 300;
    const BATCH_SIZE: usize = 100;

    let mut ids = HashSet::new();
    for batch in 0..NUM_ORDERS / BATCH_SIZE {
        let mut handles = Vec::with_capacity(BATCH_SIZE);
        for _ in 0..BATCH_SIZE {
            let client = client.clone();
            let server = server.clone();
            handles.push(tokio::spawn(async move {
                place(&client, &server, PaymentMethod::Cod).await.id
            }));
        }
        let results: Vec<_> = futures::future::join_all(handles).await;
        for result in results {
            assert!(ids.insert(result.unwrap()), "duplicate id in batch {batch}");
        }
    }

    assert_eq!(ids.len(), NUM_ORDERS);
    assert_eq!(server.platform.orders().len(), NUM_ORDERS);
}

/// Many identical status requests race; exactly one wins.
#[tokio::test]
#[ignore = "opens hundreds of connections, may fail in CI"]
async fn concurrent_status_updates_apply_once() {
    let server = Arc::new(TestServer::new().await);
    let client = Client::new();
    let order = place(&client, &server, PaymentMethod::Cod).await;
    client
        .post(server.url(&format!("/orders/{}/assign", order.id)))
        .json(&AssignRequest { driver: DRIVER.0 })
        .send()
        .await
        .unwrap();

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let client = client.clone();
            let url = server.url(&format!("/orders/{}/status", order.id));
            tokio::spawn(async move {
                client
                    .post(url)
                    .as_user(DRIVER, "driver@example.com")
                    .json(&StatusRequest {
                        status: OrderStatus::ToRestaurant,
                    })
                    .send()
                    .await
                    .unwrap()
                    .status()
            })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(handles).await;
    let mut ok = 0;
    let mut conflict = 0;
    for result in results {
        match result.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::CONFLICT => conflict += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflict, 99);
}

/// Orders placed over HTTP and settled in parallel never overdraw the customer.
#[tokio::test]
#[ignore = "opens hundreds of connections, may fail in CI"]
async fn concurrent_settlements_stay_within_funds() {
    let server = Arc::new(TestServer::new().await);
    let client = Client::new();
    // Enough for 5 of the 10 orders.
    server
        .platform
        .ledger()
        .deposit(CUSTOMER, dec!(600))
        .unwrap();

    let mut orders = Vec::new();
    for _ in 0..10 {
        orders.push(place(&client, &server, PaymentMethod::Wallet).await.id);
    }

    let mut handles = Vec::new();
    for id in orders {
        let server = server.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            server.platform.orders().settle(id).is_ok()
        }));
    }
    let results: Vec<_> = futures::future::join_all(handles).await;
    let settled = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();

    assert_eq!(settled, 5);
    let wallet = server.platform.ledger().wallet_for(CUSTOMER).unwrap();
    assert_eq!(server.platform.ledger().balance(wallet).unwrap(), Decimal::ZERO);
}

/// Concurrent chat from both parties is all delivered to history.
#[tokio::test]
#[ignore = "opens hundreds of connections, may fail in CI"]
async fn concurrent_chat_is_fully_persisted() {
    let server = Arc::new(TestServer::new().await);
    let client = Client::new();
    let order = place(&client, &server, PaymentMethod::Cod).await;
    client
        .post(server.url(&format!("/orders/{}/assign", order.id)))
        .json(&AssignRequest { driver: DRIVER.0 })
        .send()
        .await
        .unwrap();

    const MESSAGES: usize = 100;
    let handles: Vec<_> = (0..MESSAGES)
        .map(|n| {
            let client = client.clone();
            let url = server.url(&format!("/orders/{}/chat", order.id));
            let (id, email) = if n % 2 == 0 {
                (CUSTOMER, "customer@example.com")
            } else {
                (DRIVER, "driver@example.com")
            };
            tokio::spawn(async move {
                client
                    .post(url)
                    .as_user(id, email)
                    .json(&ChatRequest {
                        text: format!("message {n}"),
                    })
                    .send()
                    .await
                    .unwrap()
                    .status()
            })
        })
        .collect();
    let results: Vec<_> = futures::future::join_all(handles).await;
    for result in results {
        assert_eq!(result.unwrap(), StatusCode::OK);
    }

    server.platform.shutdown().await;
    let page: HistoryPage = client
        .get(server.url(&format!("/orders/{}/chat?page=0&size=100", order.id)))
        .as_user(CUSTOMER, "customer@example.com")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page.total, MESSAGES);
    assert_eq!(page.messages.len(), MESSAGES);
}
