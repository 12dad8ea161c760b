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

//! Integration tests for the REST API surface with concurrent requests.
//!
//! These tests verify that the engine behaves correctly behind an axum
//! router under concurrent client traffic.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use coursepay_rs::{
    Course, CourseId, CourseStatus, EnrollmentId, EnrollmentStatus, Environment, FeeSchedule,
    GatewayCallback, InMemoryCatalog, Lesson, LessonId, Marketplace, MarketplaceError,
    MethodDetails, Module, ModuleId, PaymentId, PaymentTarget, ProgressDelta, SandboxGateway,
    UserId,
};
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;

// === DTOs (duplicated from the demo server for test isolation) ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub amount: Decimal,
    pub phone_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRequest {
    pub user_id: UserId,
    pub lesson_id: LessonId,
    pub time_spent: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Server Setup ===

#[derive(Clone)]
pub struct AppState {
    pub market: Arc<Marketplace>,
}

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
            MarketplaceError::AlreadyEnrolled { .. } => (StatusCode::CONFLICT, "ALREADY_ENROLLED"),
            _ => (StatusCode::BAD_REQUEST, "ERROR"),
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

async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<PaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let payment = state.market.payments().create_payment(
        request.user_id,
        PaymentTarget::Course(request.course_id),
        request.amount,
        &MethodDetails::MobileMoney {
            phone_number: request.phone_number,
        },
    )?;
    Ok((StatusCode::CREATED, Json(payment)))
}

async fn gateway_callback(
    State(state): State<AppState>,
    Json(callback): Json<GatewayCallback>,
) -> Result<impl IntoResponse, AppError> {
    let payment = state.market.payments().confirm_gateway_callback(&callback)?;
    state.market.dispatch_pending();
    Ok(Json(payment))
}

async fn update_progress(
    State(state): State<AppState>,
    Path(enrollment_id): Path<EnrollmentId>,
    Json(request): Json<ProgressRequest>,
) -> Result<impl IntoResponse, AppError> {
    let delta = ProgressDelta {
        current_lesson: None,
        time_spent: request.time_spent,
        position: None,
    };
    let enrollment = state.market.enrollments().update_progress(
        enrollment_id,
        request.user_id,
        request.lesson_id,
        &delta,
    )?;
    state.market.dispatch_pending();
    Ok(Json(enrollment))
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/payments", post(create_payment))
        .route("/payments/callback", post(gateway_callback))
        .route("/enrollments/{id}/progress", post(update_progress))
        .with_state(state)
}

fn sample_course(lesson_count: usize) -> Course {
    Course {
        id: CourseId::new(),
        title: "Rust Essentials".to_string(),
        category: "tech".to_string(),
        price: dec!(1500),
        currency: "MZN".to_string(),
        status: CourseStatus::Published,
        rating: 4.5,
        enrollment_count: 0,
        modules: vec![Module {
            id: ModuleId::new(),
            title: "Module 1".to_string(),
            order: 1,
            price: dec!(300),
            lessons: (0..lesson_count)
                .map(|li| Lesson {
                    id: LessonId::new(),
                    title: format!("Lesson {}", li + 1),
                    order: li as u32 + 1,
                    is_preview: false,
                })
                .collect(),
        }],
    }
}

/// Test server that binds to an ephemeral port.
struct TestServer {
    base_url: String,
    market: Arc<Marketplace>,
    course: Course,
}

impl TestServer {
    async fn new(lesson_count: usize) -> Self {
        let course = sample_course(lesson_count);
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.insert_course(course.clone());
        let market = Arc::new(Marketplace::new(
            catalog,
            Arc::new(SandboxGateway::new()),
            FeeSchedule::default(),
            Environment::Sandbox,
        ));

        let state = AppState {
            market: Arc::clone(&market),
        };
        let app = create_router(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for the server to accept connections.
        let client = Client::new();
        let probe = format!("{}/payments", base_url);
        for _ in 0..50 {
            match client.post(&probe).json(&serde_json::json!({})).send().await {
                Ok(_) => break,
                Err(_) => tokio::time::sleep(tokio::time::Duration::from_millis(50)).await,
            }
        }

        TestServer {
            base_url,
            market,
            course,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

// === Tests ===
// These tests are ignored in CI due to connection issues on some platforms.
// Run manually with: cargo test --test server_test -- --ignored

/// Full purchase-to-completion flow over HTTP.
#[tokio::test]
#[ignore = "requires running server, may fail in CI"]
async fn purchase_and_complete_over_http() {
    let server = TestServer::new(3).await;
    let client = Client::new();
    let user = UserId::new();

    // Create the payment.
    let response = client
        .post(server.url("/payments"))
        .json(&PaymentRequest {
            user_id: user,
            course_id: server.course.id,
            amount: dec!(1500),
            phone_number: "841234567".to_string(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let payment: serde_json::Value = response.json().await.unwrap();
    let reference = payment["reference"].as_str().unwrap().to_string();
    let payment_id: PaymentId = serde_json::from_value(payment["id"].clone()).unwrap();

    // Gateway confirms; the grant rides the dispatch inside the handler.
    let response = client
        .post(server.url("/payments/callback"))
        .json(&GatewayCallback {
            response_code: "INS-0".to_string(),
            transaction_id: "MPESA1".to_string(),
            response_desc: "ok".to_string(),
            reference,
            signed_data: None,
        })
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let enrollment = server
        .market
        .enrollments()
        .enrollments_for(user)
        .into_iter()
        .next()
        .expect("callback should have granted an enrollment");
    assert_eq!(enrollment.payment_id, Some(payment_id));

    // Complete every lesson over HTTP.
    for module in &server.course.modules {
        for lesson in &module.lessons {
            let response = client
                .post(server.url(&format!("/enrollments/{}/progress", enrollment.id)))
                .json(&ProgressRequest {
                    user_id: user,
                    lesson_id: lesson.id,
                    time_spent: Some(10),
                })
                .send()
                .await
                .unwrap();
            assert!(response.status().is_success());
        }
    }

    let done = server.market.enrollments().get(enrollment.id, user).unwrap();
    assert_eq!(done.status, EnrollmentStatus::Completed);
    assert_eq!(done.progress, dec!(100));
    assert!(done.certificate_id.is_some());
}

/// Wrong amounts are rejected with a 400 and leave no record behind.
#[tokio::test]
#[ignore = "requires running server, may fail in CI"]
async fn wrong_amount_is_rejected_over_http() {
    let server = TestServer::new(1).await;
    let client = Client::new();
    let user = UserId::new();

    let response = client
        .post(server.url("/payments"))
        .json(&PaymentRequest {
            user_id: user,
            course_id: server.course.id,
            amount: dec!(999),
            phone_number: "841234567".to_string(),
        })
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = response.json().await.unwrap();
    assert_eq!(body.code, "INVALID_AMOUNT");
    assert!(server.market.payments().user_payments(user, None).is_empty());
}

/// Concurrent progress updates for distinct lessons of one enrollment.
#[tokio::test]
#[ignore = "requires running server, may fail in CI"]
async fn concurrent_progress_updates_over_http() {
    const LESSONS: usize = 40;
    let server = TestServer::new(LESSONS).await;
    let client = Client::new();
    let user = UserId::new();

    let enrollment = server
        .market
        .enrollments()
        .enroll(user, server.course.id)
        .unwrap();

    let lesson_ids: Vec<LessonId> = server.course.modules[0]
        .lessons
        .iter()
        .map(|l| l.id)
        .collect();

    let start = Instant::now();
    let mut handles = Vec::with_capacity(LESSONS * 2);

    // Every lesson twice, concurrently: unions must hold, repeats must
    // not inflate.
    for lesson_id in lesson_ids.iter().chain(lesson_ids.iter()) {
        let client = client.clone();
        let url = server.url(&format!("/enrollments/{}/progress", enrollment.id));
        let lesson_id = *lesson_id;

        handles.push(tokio::spawn(async move {
            let response = client
                .post(&url)
                .json(&ProgressRequest {
                    user_id: user,
                    lesson_id,
                    time_spent: Some(1),
                })
                .send()
                .await
                .unwrap();
            response.status()
        }));
    }

    let results = futures::future::join_all(handles).await;
    let successful = results
        .iter()
        .filter(|r| r.as_ref().unwrap().is_success())
        .count();
    let elapsed = start.elapsed();

    println!(
        "Processed {} progress updates in {:?} ({:.0} req/s)",
        LESSONS * 2,
        elapsed,
        (LESSONS * 2) as f64 / elapsed.as_secs_f64()
    );

    assert_eq!(successful, LESSONS * 2, "all updates should succeed");

    let done = server.market.enrollments().get(enrollment.id, user).unwrap();
    assert_eq!(done.completed_lessons.len(), LESSONS);
    assert_eq!(done.progress, dec!(100));
    assert_eq!(done.status, EnrollmentStatus::Completed);
    assert_eq!(done.time_spent, (LESSONS * 2) as u64);
    assert!(
        server
            .market
            .certificates()
            .for_enrollment(enrollment.id)
            .is_some()
    );
}
