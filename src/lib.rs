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

//! # CoursePay
//!
//! This library provides the payment and enrollment engine for an online
//! learning marketplace: mobile-money purchases with derived fees and VAT,
//! idempotent gateway callback handling, refunds, enrollment progress
//! tracking, and certificate issuance with public verification.
//!
//! ## Core Components
//!
//! - [`Marketplace`]: Facade wiring the engines to one event outbox
//! - [`PaymentProcessor`]: Validates, prices, and settles payments
//! - [`EnrollmentManager`]: Access grants, progress, and completion
//! - [`CertificateIssuer`]: Verifiable completion certificates
//! - [`MobileMoneyGateway`]: Seam to the mobile-money gateway
//! - [`Catalog`]: Seam to the course catalog
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use rust_decimal_macros::dec;
//! use coursepay_rs::{
//!     Catalog, Course, CourseId, CourseStatus, Environment, FeeSchedule,
//!     InMemoryCatalog, Marketplace, MethodDetails, PaymentTarget,
//!     SandboxGateway, UserId,
//! };
//!
//! let catalog = Arc::new(InMemoryCatalog::new());
//! catalog.insert_course(Course {
//!     id: CourseId::new(),
//!     title: "Rust Essentials".to_string(),
//!     category: "tech".to_string(),
//!     price: dec!(1500),
//!     currency: "MZN".to_string(),
//!     status: CourseStatus::Published,
//!     rating: 4.5,
//!     enrollment_count: 0,
//!     modules: Vec::new(),
//! });
//! let course_id = catalog.list(&Default::default())[0].id;
//!
//! let market = Marketplace::new(
//!     catalog,
//!     Arc::new(SandboxGateway::new()),
//!     FeeSchedule::default(),
//!     Environment::Sandbox,
//! );
//!
//! // 2% mobile-money fee and 16% VAT are derived, never caller-supplied.
//! let payment = market
//!     .payments()
//!     .create_payment(
//!         UserId::new(),
//!         PaymentTarget::Course(course_id),
//!         dec!(1500),
//!         &MethodDetails::MobileMoney {
//!             phone_number: "84 123 4567".to_string(),
//!         },
//!     )
//!     .unwrap();
//! assert_eq!(payment.total_amount(), dec!(1770));
//! ```
//!
//! ## Thread Safety
//!
//! All engines serialize mutation per record through their concurrent maps,
//! so duplicate gateway callbacks and racing progress updates are safe to
//! process in parallel.

pub mod base;
pub mod catalog;
mod certificate;
mod enrollment;
pub mod error;
mod events;
mod gateway;
mod marketplace;
mod payment;
mod processor;

pub use base::{
    CertificateId, CourseId, EnrollmentId, LessonId, ModuleId, PaymentId, UserId,
};
pub use catalog::{
    Catalog, Course, CourseFilter, CourseStatus, InMemoryCatalog, Lesson, LessonRef, Module,
    ModuleRef,
};
pub use certificate::{Certificate, CertificateIssuer};
pub use enrollment::{
    Enrollment, EnrollmentManager, EnrollmentStatus, ProgressDelta, progress_percentage,
};
pub use error::MarketplaceError;
pub use events::{EventOutbox, MarketEvent};
pub use gateway::{
    GatewayCallback, GatewayStatus, MobileMoneyGateway, SUCCESS_CODE, SandboxGateway,
    normalize_phone_number, validate_phone_number,
};
pub use marketplace::Marketplace;
pub use payment::{
    FeeSchedule, MethodDetails, Payment, PaymentMethod, PaymentStatus, PaymentTarget, RefundInfo,
    transaction_reference,
};
pub use processor::{Environment, PaymentProcessor, PaymentStats};
