//! REST + WebSocket demo server for the delivery platform.
//!
//! Run with: `cargo run --example server`
//!
//! Callers identify themselves with `x-user-id` and `x-user-email` headers.
//! The server seeds one restaurant, customer 100 and driver 1000.
//!
//! ## Endpoints
//!
//! - `POST /orders` - Place an order
//! - `GET /orders/{id}` - Get an order
//! - `POST /orders/{id}/assign` - Assign a driver
//! - `POST /orders/{id}/status` - Advance the order (driver only)
//! - `POST /orders/{id}/cancel` - Cancel the order
//! - `POST /orders/{id}/location` - Report driver location
//! - `POST /orders/{id}/chat` - Send a chat message
//! - `GET /orders/{id}/chat?page=0&size=20` - Chat history
//! - `POST /orders/{id}/payment-url` - Start a gateway payment
//! - `GET /payments/gateway/callback` - Gateway return URL
//! - `GET /orders/{id}/feed` - WebSocket event feed
//! - `GET /wallets` - List all wallets
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:3000/orders \
//!   -H "Content-Type: application/json" \
//!   -H "x-user-id: 100" -H "x-user-email: customer@example.com" \
//!   -d '{"restaurant": 1, "items": [{"dish": 10, "quantity": 2}],
//!        "street": "1 Nguyen Hue", "lat": 10.80, "lng": 106.71, "payment_method": "WALLET"}'
//!
//! curl -X POST http://localhost:3000/orders/1/assign \
//!   -H "Content-Type: application/json" -d '{"driver": 1000}'
//! ```

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use delivery_core_rs::chat::InMemoryChatLog;
use delivery_core_rs::directory::{
    Dish, DriverStatus, InMemoryCatalog, InMemoryDirectory, Restaurant, Role, UserProfile,
};
use delivery_core_rs::gateway::{GatewayParams, HostedPaymentPage};
use delivery_core_rs::logging::init_tracing;
use delivery_core_rs::{
    CallbackOutcome, Collaborators, Config, DeliveryAddress, DeliveryError, DishId, GeoPoint,
    HistoryPage, Identity, NewOrder, Order, OrderId, OrderItem, OrderStatus, PaymentMethod,
    Platform, PushOutcome, RealtimeEvent, RestaurantId, SystemClock, UserId, WalletId,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub restaurant: u32,
    pub items: Vec<OrderItem>,
    pub street: String,
    pub lat: f64,
    pub lng: f64,
    pub payment_method: PaymentMethod,
    pub surge: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub driver: u32,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub size: usize,
}

fn default_page_size() -> usize {
    20
}

#[derive(Debug, Serialize)]
pub struct PaymentUrlResponse {
    pub order: OrderId,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct WalletResponse {
    pub wallet: WalletId,
    pub owner: UserId,
    pub balance: Decimal,
    pub transactions: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

#[derive(Clone)]
pub struct AppState {
    pub platform: Arc<Platform>,
    pub base_url: String,
}

/// Reads the caller identity from `x-user-id` / `x-user-email`.
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

// === Error Handling ===

/// Wrapper for converting `DeliveryError` into HTTP responses.
pub struct AppError(DeliveryError);

impl From<DeliveryError> for AppError {
    fn from(err: DeliveryError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            DeliveryError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION"),
            DeliveryError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            DeliveryError::InvalidState(_) => (StatusCode::CONFLICT, "INVALID_STATE"),
            DeliveryError::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            DeliveryError::InsufficientFunds { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_FUNDS")
            }
            DeliveryError::InvalidAmount => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
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

// === Handlers ===

/// POST /orders - Place an order as the calling customer.
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
            restaurant: RestaurantId(request.restaurant),
            items: request.items,
            address: DeliveryAddress {
                street: request.street,
                location: GeoPoint::new(request.lat, request.lng)?,
            },
            payment_method: request.payment_method,
            surge: request.surge,
        },
    )?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders/{id}
async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.platform.orders().get(OrderId(id))?))
}

/// POST /orders/{id}/assign
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

/// POST /orders/{id}/status
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

/// POST /orders/{id}/cancel
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

/// POST /orders/{id}/location
async fn report_location(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    Json(request): Json<LocationRequest>,
) -> Result<Json<PushOutcome>, AppError> {
    Ok(Json(state.platform.report_location(
        &identity(&headers),
        OrderId(id),
        request.lat,
        request.lng,
    )?))
}

/// POST /orders/{id}/chat
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

/// GET /orders/{id}/chat
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

/// POST /orders/{id}/payment-url
async fn payment_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<Json<PaymentUrlResponse>, AppError> {
    let request = state
        .platform
        .payment_url(&identity(&headers), OrderId(id), "127.0.0.1", &state.base_url)
        .await?;
    Ok(Json(PaymentUrlResponse {
        order: request.order,
        url: request.url,
    }))
}

/// GET /payments/gateway/callback
async fn gateway_callback(
    State(state): State<AppState>,
    Query(params): Query<GatewayParams>,
) -> Result<Json<CallbackOutcome>, AppError> {
    Ok(Json(state.platform.gateway_callback(&params)?))
}

/// GET /orders/{id}/feed - Upgrades to a WebSocket carrying the order's events.
async fn order_feed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let events = state.platform.subscribe(&identity(&headers), OrderId(id))?;
    Ok(ws.on_upgrade(move |socket| forward_events(socket, events)))
}

async fn forward_events(mut socket: WebSocket, mut events: broadcast::Receiver<RealtimeEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let Ok(frame) = event.to_frame() else {
                    continue;
                };
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

/// GET /wallets - List all wallets.
async fn list_wallets(State(state): State<AppState>) -> Json<Vec<WalletResponse>> {
    let wallets = state
        .platform
        .ledger()
        .wallets()
        .iter()
        .map(|wallet| WalletResponse {
            wallet: wallet.id(),
            owner: wallet.owner(),
            balance: wallet.balance(),
            transactions: wallet.transaction_count(),
        })
        .collect();
    Json(wallets)
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(place_order))
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/assign", post(assign_driver))
        .route("/orders/{id}/status", post(update_status))
        .route("/orders/{id}/cancel", post(cancel_order))
        .route("/orders/{id}/location", post(report_location))
        .route("/orders/{id}/chat", post(send_chat).get(chat_history))
        .route("/orders/{id}/payment-url", post(payment_url))
        .route("/orders/{id}/feed", get(order_feed))
        .route("/payments/gateway/callback", get(gateway_callback))
        .route("/wallets", get(list_wallets))
        .with_state(state)
}

fn seeded_platform() -> Result<Platform, DeliveryError> {
    let directory = Arc::new(InMemoryDirectory::new());
    let catalog = Arc::new(InMemoryCatalog::new());

    directory.add_user(UserProfile {
        id: UserId(2),
        name: "Kitchen owner".into(),
        email: "owner@example.com".into(),
        role: Role::RestaurantOwner,
    });
    directory.add_user(UserProfile {
        id: UserId(100),
        name: "Customer".into(),
        email: "customer@example.com".into(),
        role: Role::Customer,
    });
    directory.add_user(UserProfile {
        id: UserId(1000),
        name: "Driver".into(),
        email: "driver@example.com".into(),
        role: Role::Driver,
    });
    directory.set_driver_status(UserId(1000), DriverStatus::Online)?;

    catalog.add_restaurant(Restaurant {
        id: RestaurantId(1),
        owner: UserId(2),
        name: "Kitchen".into(),
        location: GeoPoint::new(10.7769, 106.7009)?,
    });
    for (d, price) in [dec!(45000), dec!(65000)].into_iter().enumerate() {
        catalog.add_dish(Dish {
            id: DishId(10 + d as u32),
            restaurant: RestaurantId(1),
            name: format!("Dish {d}"),
            price,
            available: true,
        });
    }

    let platform = Platform::new(
        Config::from_env(),
        Collaborators {
            directory,
            catalog,
            gateway: Arc::new(HostedPaymentPage),
            chat_log: Arc::new(InMemoryChatLog::new()),
            clock: Arc::new(SystemClock),
            platform_owner: UserId(1),
        },
    );
    platform.ledger().deposit(UserId(100), dec!(1000000))?;
    Ok(platform)
}

// === Main ===

#[tokio::main]
async fn main() {
    init_tracing("info");

    let state = AppState {
        platform: Arc::new(seeded_platform().unwrap()),
        base_url: "http://127.0.0.1:3000".into(),
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    println!("Delivery API server running on http://127.0.0.1:3000");
    println!();
    println!("Endpoints:");
    println!("  POST /orders                      - Place an order");
    println!("  GET  /orders/{{id}}                 - Get an order");
    println!("  POST /orders/{{id}}/assign          - Assign a driver");
    println!("  POST /orders/{{id}}/status          - Advance status (driver)");
    println!("  POST /orders/{{id}}/cancel          - Cancel");
    println!("  POST /orders/{{id}}/location        - Report location (driver)");
    println!("  POST /orders/{{id}}/chat            - Send chat");
    println!("  GET  /orders/{{id}}/chat            - Chat history");
    println!("  POST /orders/{{id}}/payment-url     - Start gateway payment");
    println!("  GET  /orders/{{id}}/feed            - WebSocket feed");
    println!("  GET  /payments/gateway/callback   - Gateway return");
    println!("  GET  /wallets                     - List wallets");

    axum::serve(listener, app).await.unwrap();
}
