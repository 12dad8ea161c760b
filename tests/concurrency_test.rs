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

//! Concurrency tests for the cross-request hazards: duplicate gateway
//! callbacks, racing enrolls for one (user, course) pair, and concurrent
//! progress updates for different lessons of the same enrollment.

use coursepay_rs::{
    Course, CourseId, CourseStatus, EnrollmentStatus, Environment, FeeSchedule, GatewayCallback,
    InMemoryCatalog, Lesson, LessonId, Marketplace, MarketplaceError, MethodDetails, Module,
    ModuleId, PaymentStatus, PaymentTarget, ProgressDelta, SandboxGateway, UserId,
};
use parking_lot::deadlock;
use rayon::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

fn sample_course(price: Decimal, lesson_count: usize) -> Course {
    Course {
        id: CourseId::new(),
        title: "Rust Essentials".to_string(),
        category: "tech".to_string(),
        price,
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

fn marketplace(course: &Course) -> Arc<Marketplace> {
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.insert_course(course.clone());
    Arc::new(Marketplace::new(
        catalog,
        Arc::new(SandboxGateway::new()),
        FeeSchedule::default(),
        Environment::Sandbox,
    ))
}

#[test]
fn duplicate_callbacks_settle_exactly_once() {
    let course = sample_course(dec!(1500), 2);
    let market = marketplace(&course);
    let user = UserId::new();

    let payment = market
        .payments()
        .create_payment(
            user,
            PaymentTarget::Course(course.id),
            dec!(1500),
            &MethodDetails::MobileMoney {
                phone_number: "841234567".to_string(),
            },
        )
        .unwrap();

    let callback = GatewayCallback {
        response_code: "INS-0".to_string(),
        transaction_id: "MPESA42".to_string(),
        response_desc: "ok".to_string(),
        reference: payment.reference.clone(),
        signed_data: None,
    };

    // At-least-once delivery: eight concurrent deliveries of the same
    // callback.
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let market = Arc::clone(&market);
            let callback = callback.clone();
            thread::spawn(move || market.payments().confirm_gateway_callback(&callback))
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }

    let settled = market.payments().get_payment(payment.id, user).unwrap();
    assert_eq!(settled.status, PaymentStatus::Completed);

    // Exactly one application queued the grant event.
    assert_eq!(market.dispatch_pending(), 1);
    assert_eq!(market.enrollments().enrollments_for(user).len(), 1);
    assert!(market.outbox().is_empty());
}

#[test]
fn racing_enrolls_create_one_row() {
    let course = sample_course(dec!(1500), 2);
    let market = marketplace(&course);
    let user = UserId::new();
    let successes = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let market = Arc::clone(&market);
            let successes = Arc::clone(&successes);
            let course_id = course.id;
            thread::spawn(move || match market.enrollments().enroll(user, course_id) {
                Ok(_) => {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
                Err(MarketplaceError::AlreadyEnrolled { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(market.enrollments().enrollments_for(user).len(), 1);
}

#[test]
fn concurrent_lesson_completions_are_all_reflected() {
    let course = sample_course(dec!(1500), 20);
    let lessons: Vec<LessonId> = course.modules[0].lessons.iter().map(|l| l.id).collect();
    let market = marketplace(&course);
    let user = UserId::new();
    let enrollment = market.enrollments().enroll(user, course.id).unwrap();

    // Two passes over every lesson in parallel: set union must reflect
    // each lesson once, and repeats must not inflate progress.
    lessons
        .par_iter()
        .chain(lessons.par_iter())
        .for_each(|lesson| {
            market
                .enrollments()
                .update_progress(enrollment.id, user, *lesson, &ProgressDelta::default())
                .unwrap();
        });

    let done = market.enrollments().get(enrollment.id, user).unwrap();
    assert_eq!(done.completed_lessons.len(), 20);
    assert_eq!(done.progress, dec!(100));
    assert_eq!(done.status, EnrollmentStatus::Completed);

    // The completion transition fired exactly once.
    assert_eq!(market.dispatch_pending(), 1);
    assert!(market.outbox().is_empty());
    assert!(market.certificates().for_enrollment(enrollment.id).is_some());
}

#[test]
fn concurrent_time_deltas_accumulate() {
    let course = sample_course(dec!(1500), 1);
    let lesson = course.modules[0].lessons[0].id;
    let market = marketplace(&course);
    let user = UserId::new();
    let enrollment = market.enrollments().enroll(user, course.id).unwrap();

    (0..50).into_par_iter().for_each(|_| {
        market
            .enrollments()
            .update_progress(
                enrollment.id,
                user,
                lesson,
                &ProgressDelta {
                    current_lesson: None,
                    time_spent: Some(2),
                    position: None,
                },
            )
            .unwrap();
    });

    let done = market.enrollments().get(enrollment.id, user).unwrap();
    assert_eq!(done.time_spent, 100);
    assert_eq!(done.completed_lessons.len(), 1);
}

#[test]
fn mixed_workload_has_no_deadlocks() {
    // Background deadlock detector in the parking_lot style: any cycle in
    // the lock graph fails the test.
    let detected = Arc::new(AtomicUsize::new(0));
    {
        let detected = Arc::clone(&detected);
        thread::spawn(move || {
            for _ in 0..40 {
                thread::sleep(Duration::from_millis(50));
                let deadlocks = deadlock::check_deadlock();
                if !deadlocks.is_empty() {
                    detected.store(deadlocks.len(), Ordering::SeqCst);
                    return;
                }
            }
        });
    }

    let course = sample_course(dec!(1500), 5);
    let lessons: Vec<LessonId> = course.modules[0].lessons.iter().map(|l| l.id).collect();
    let market = marketplace(&course);

    let users: Vec<UserId> = (0..16).map(|_| UserId::new()).collect();
    users.par_iter().for_each(|&user| {
        let payment = market
            .payments()
            .create_payment(
                user,
                PaymentTarget::Course(course.id),
                dec!(1500),
                &MethodDetails::Card,
            )
            .unwrap();
        market
            .payments()
            .confirm_gateway_callback(&GatewayCallback {
                response_code: "INS-0".to_string(),
                transaction_id: format!("MPESA-{user}"),
                response_desc: "ok".to_string(),
                reference: payment.reference.clone(),
                signed_data: None,
            })
            .unwrap();
        market.dispatch_pending();

        let enrollment = market
            .enrollments()
            .enrollments_for(user)
            .into_iter()
            .next()
            .unwrap();
        lessons.par_iter().for_each(|lesson| {
            market
                .enrollments()
                .update_progress(enrollment.id, user, *lesson, &ProgressDelta::default())
                .unwrap();
        });
        market.dispatch_pending();
        market.payments().stats(user);
    });

    assert_eq!(detected.load(Ordering::SeqCst), 0, "deadlock detected");

    for user in &users {
        let enrollment = market
            .enrollments()
            .enrollments_for(*user)
            .into_iter()
            .next()
            .unwrap();
        assert_eq!(enrollment.progress, dec!(100));
        assert_eq!(enrollment.status, EnrollmentStatus::Completed);
    }
}
