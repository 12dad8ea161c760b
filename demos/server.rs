//! Simple REST API server example for the marketplace engine.
//!
//! Run with: `cargo run --example server`
//!
//! ## Endpoints
//!
//! - `POST /payments` - Create a payment (course, module, or wallet top-up)
//! - `POST /payments/callback` - Inbound gateway callback
//! - `POST /payments/{id}/refund` - Refund a completed payment
//! - `GET /payments/stats/{user}` - Per-user payment aggregates
//! - `POST /courses/{id}/enroll` - Enroll in a published course
//! - `POST /enrollments/{id}/progress` - Record a lesson completion
//! - `GET /lessons/{id}` - Fetch a lesson (previews are public)
//! - `GET /certificates/{code}` - Public certificate verification
//!
//! ## Example Usage
//!
//! ```bash
//! # Purchase a course with mobile money
//! curl -X POST http://localhost:3000/payments \
//!   -H "Content-Type: application/json" \
//!   -d '{"user_id": "<uuid>", "course_id": "<uuid>", "amount": "1500", "method": "mobile_money", "phone_number": "841234567"}'
//!
//! # Simulate the gateway confirming the transfer
//! curl -X POST http://localhost:3000/payments/callback \
//!   -H "Content-Type: application/json" \
//!   -d '{"response_code": "INS-0", "transaction_id": "MPESA1", "response_desc": "ok", "reference": "<PAY...>", "signed_data": null}'
//! ```

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use coursepay_rs::{
    Course, CourseId, CourseStatus, EnrollmentId, Environment, FeeSchedule, GatewayCallback,
    InMemoryCatalog, Lesson, LessonId, Marketplace, MarketplaceError, MethodDetails, Module,
    ModuleId, PaymentId, PaymentTarget, ProgressDelta, SandboxGateway, UserId,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

// === Request/Response DTOs ===

/// Request body for creating a payment.
///
/// Exactly one of `course_id`/`module_id` selects the purchase target;
/// neither means a wallet top-up.
#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub user_id: UserId,
    pub course_id: Option<CourseId>,
    pub module_id: Option<ModuleId>,
    pub amount: Decimal,
    pub method: String,
    pub phone_number: Option<String>,
}

impl PaymentRequest {
    fn into_parts(self) -> Result<(UserId, PaymentTarget, Decimal, MethodDetails), AppError> {
        let target = match (self.course_id, self.module_id) {
            (Some(course_id), None) => PaymentTarget::Course(course_id),
            (None, Some(module_id)) => PaymentTarget::Module(module_id),
            (None, None) => PaymentTarget::WalletTopUp,
            (Some(_), Some(_)) => {
                return Err(AppError(MarketplaceError::Forbidden {
                    reason: "a payment targets a course or a module, not both".to_string(),
                }));
            }
        };

        let details = match self.method.as_str() {
            "mobile_money" => MethodDetails::MobileMoney {
                phone_number: self.phone_number.unwrap_or_default(),
            },
            "card" => MethodDetails::Card,
            "wallet" => MethodDetails::Wallet,
            other => {
                return Err(AppError(MarketplaceError::Forbidden {
                    reason: format!("unknown payment method '{other}'"),
                }));
            }
        };

        Ok((self.user_id, target, self.amount, details))
    }
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub user_id: UserId,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub user_id: UserId,
    pub lesson_id: LessonId,
    pub current_lesson: Option<LessonId>,
    pub time_spent: Option<u64>,
    pub position: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct LessonQuery {
    pub user_id: Option<UserId>,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state containing the marketplace engine.
#[derive(Clone)]
pub struct AppState {
    pub market: Arc<Marketplace>,
}

// === Error Handling ===

/// Wrapper for converting `MarketplaceError` into HTTP responses.
pub struct AppError(MarketplaceError);

impl From<MarketplaceError> for AppError {
    fn from(err: MarketplaceError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            MarketplaceError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            MarketplaceError::InvalidAmount { .. } => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
            MarketplaceError::InvalidState { .. } => (StatusCode::CONFLICT, "INVALID_STATE"),
            MarketplaceError::NotRefundable { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "NOT_REFUNDABLE")
            }
            MarketplaceError::AlreadyEnrolled { .. } => (StatusCode::CONFLICT, "ALREADY_ENROLLED"),
            MarketplaceError::NotAvailable { .. } => (StatusCode::BAD_REQUEST, "NOT_AVAILABLE"),
            MarketplaceError::Forbidden { .. } => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            MarketplaceError::InvalidPhoneNumber { .. } => {
                (StatusCode::BAD_REQUEST, "INVALID_PHONE_NUMBER")
            }
            MarketplaceError::GatewayError { .. } => (StatusCode::BAD_GATEWAY, "GATEWAY_ERROR"),
            MarketplaceError::InvalidSignature => (StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE"),
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

/// POST /payments - Create a payment.
async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<PaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (user_id, target, amount, details) = request.into_parts()?;
    let payment = state
        .market
        .payments()
        .create_payment(user_id, target, amount, &details)?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// POST /payments/callback - Apply an inbound gateway callback.
async fn gateway_callback(
    State(state): State<AppState>,
    Json(callback): Json<GatewayCallback>,
) -> Result<impl IntoResponse, AppError> {
    let payment = state.market.payments().confirm_gateway_callback(&callback)?;
    // Enrollment grants ride the outbox; the callback response does not
    // wait for them beyond this drain.
    state.market.dispatch_pending();
    Ok(Json(payment))
}

/// POST /payments/{id}/refund - Refund a completed payment.
async fn refund_payment(
    State(state): State<AppState>,
    Path(id): Path<PaymentId>,
    Json(request): Json<RefundRequest>,
) -> Result<impl IntoResponse, AppError> {
    let payment = state
        .market
        .payments()
        .refund(id, &request.reason, request.user_id)?;
    Ok(Json(payment))
}

/// GET /payments/stats/{user} - Per-user payment aggregates.
async fn payment_stats(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> impl IntoResponse {
    Json(state.market.payments().stats(user_id))
}

/// POST /courses/{id}/enroll - Enroll in a published course.
async fn enroll(
    State(state): State<AppState>,
    Path(course_id): Path<CourseId>,
    Json(request): Json<EnrollRequest>,
) -> Result<impl IntoResponse, AppError> {
    let enrollment = state.market.enrollments().enroll(request.user_id, course_id)?;
    Ok((StatusCode::CREATED, Json(enrollment)))
}

/// POST /enrollments/{id}/progress - Record a lesson completion.
async fn update_progress(
    State(state): State<AppState>,
    Path(enrollment_id): Path<EnrollmentId>,
    Json(request): Json<ProgressRequest>,
) -> Result<impl IntoResponse, AppError> {
    let delta = ProgressDelta {
        current_lesson: request.current_lesson,
        time_spent: request.time_spent,
        position: request.position,
    };
    let enrollment = state.market.enrollments().update_progress(
        enrollment_id,
        request.user_id,
        request.lesson_id,
        &delta,
    )?;
    // Certificate issuance is fire-and-forget: the update has already
    // succeeded, a failed dispatch only dead-letters the event.
    state.market.dispatch_pending();
    Ok(Json(enrollment))
}

/// GET /lessons/{id} - Fetch a lesson, enforcing enrollment access.
async fn get_lesson(
    State(state): State<AppState>,
    Path(lesson_id): Path<LessonId>,
    Query(query): Query<LessonQuery>,
) -> Result<Json<Lesson>, AppError> {
    let lesson = state.market.enrollments().get_lesson(lesson_id, query.user_id)?;
    Ok(Json(lesson))
}

/// GET /certificates/{code} - Public certificate verification.
async fn verify_certificate(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state
        .market
        .certificates()
        .verify(&code)
        .map(Json)
        .ok_or_else(|| AppError(MarketplaceError::not_found("certificate", code)))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/payments", post(create_payment))
        .route("/payments/callback", post(gateway_callback))
        .route("/payments/{id}/refund", post(refund_payment))
        .route("/payments/stats/{user}", get(payment_stats))
        .route("/courses/{id}/enroll", post(enroll))
        .route("/enrollments/{id}/progress", post(update_progress))
        .route("/lessons/{id}", get(get_lesson))
        .route("/certificates/{code}", get(verify_certificate))
        .with_state(state)
}

// === Demo catalog ===

fn seed_catalog() -> Arc<InMemoryCatalog> {
    let catalog = Arc::new(InMemoryCatalog::new());
    let course = Course {
        id: CourseId::new(),
        title: "Desenvolvimento Web com Rust".to_string(),
        category: "tecnologia".to_string(),
        price: dec!(1500),
        currency: "MZN".to_string(),
        status: CourseStatus::Published,
        rating: 4.7,
        enrollment_count: 128,
        modules: vec![Module {
            id: ModuleId::new(),
            title: "Fundamentos".to_string(),
            order: 1,
            price: dec!(500),
            lessons: (1..=5)
                .map(|i| Lesson {
                    id: LessonId::new(),
                    title: format!("Aula {i}"),
                    order: i,
                    is_preview: i == 1,
                })
                .collect(),
        }],
    };
    println!("Seeded course {} ({})", course.title, course.id);
    catalog.insert_course(course);
    catalog
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let state = AppState {
        market: Arc::new(Marketplace::new(
            seed_catalog(),
            Arc::new(SandboxGateway::new()),
            FeeSchedule::default(),
            Environment::Sandbox,
        )),
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    println!("CoursePay API server running on http://127.0.0.1:3000");
    println!();
    println!("Endpoints:");
    println!("  POST /payments                  - Create a payment");
    println!("  POST /payments/callback         - Gateway callback");
    println!("  POST /payments/:id/refund       - Refund a payment");
    println!("  GET  /payments/stats/:user      - Payment stats");
    println!("  POST /courses/:id/enroll        - Enroll in a course");
    println!("  POST /enrollments/:id/progress  - Record progress");
    println!("  GET  /lessons/:id               - Fetch a lesson");
    println!("  GET  /certificates/:code        - Verify a certificate");

    axum::serve(listener, app).await.unwrap();
}
