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

//! Enrollment management.
//!
//! An enrollment is a user's access grant and progress state for a course.
//! Progress is always recomputed from the completed-lesson set, never
//! incremented, so repeated completion of the same lesson cannot inflate it.
//!
//  Active ──progress reaches 100──► Completed (terminal)
//    │ ▲
//    ▼ │resume
//  Paused
//    │
//  Active/Paused ──drop──► Dropped (terminal)

use crate::base::{CertificateId, CourseId, EnrollmentId, LessonId, PaymentId, UserId};
use crate::catalog::{Catalog, Course, Lesson};
use crate::error::MarketplaceError;
use crate::events::{EventOutbox, MarketEvent};
use crate::payment::Payment;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Lifecycle state of an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Dropped,
    Paused,
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Dropped => "dropped",
            EnrollmentStatus::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

/// A user's access grant and progress state for one course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: EnrollmentId,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub status: EnrollmentStatus,
    /// Percentage in [0, 100], recomputed from `completed_lessons`.
    pub progress: Decimal,
    /// Completion order is preserved; duplicates are forbidden.
    pub completed_lessons: Vec<LessonId>,
    pub current_lesson: Option<LessonId>,
    /// Cumulative minutes spent in the course.
    pub time_spent: u64,
    /// Last playback position in seconds.
    pub last_position: u64,
    /// Price snapshotted at enrollment time, not live-linked to the catalog.
    pub amount_paid: Decimal,
    pub currency: String,
    pub payment_id: Option<PaymentId>,
    pub certificate_id: Option<CertificateId>,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

impl Enrollment {
    pub fn is_completed(&self) -> bool {
        self.status == EnrollmentStatus::Completed
    }

    /// A dropped enrollment no longer grants access to course content.
    pub fn grants_access(&self) -> bool {
        self.status != EnrollmentStatus::Dropped
    }
}

/// Progress percentage for a completed-lesson count over a course total.
///
/// A course with no lessons yields zero rather than dividing by zero, and
/// the result is clamped to 100 (lesson ids are not validated against the
/// course outline, so the count can exceed the total).
pub fn progress_percentage(completed: usize, total_lessons: usize) -> Decimal {
    if total_lessons == 0 {
        return Decimal::ZERO;
    }
    let raw = Decimal::from(completed as u64) / Decimal::from(total_lessons as u64) * dec!(100);
    raw.min(dec!(100))
}

/// Mutation payload for a progress-update event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressDelta {
    pub current_lesson: Option<LessonId>,
    /// Minutes to add to the cumulative time spent.
    pub time_spent: Option<u64>,
    /// New playback position in seconds.
    pub position: Option<u64>,
}

/// Gates access to course content and drives the enrollment state machine.
///
/// # Invariants
///
/// - At most one enrollment per (user, course) pair, enforced by an atomic
///   check-and-insert on the uniqueness index.
/// - `Active -> Completed` happens exactly once, when progress reaches 100.
/// - Lesson completion is idempotent per lesson id.
pub struct EnrollmentManager {
    catalog: Arc<dyn Catalog>,
    outbox: Arc<EventOutbox>,
    /// Enrollment records indexed by id.
    enrollments: DashMap<EnrollmentId, Enrollment>,
    /// Uniqueness index for the one-enrollment-per-(user, course) rule.
    by_user_course: DashMap<(UserId, CourseId), EnrollmentId>,
}

impl EnrollmentManager {
    pub fn new(catalog: Arc<dyn Catalog>, outbox: Arc<EventOutbox>) -> Self {
        Self {
            catalog,
            outbox,
            enrollments: DashMap::new(),
            by_user_course: DashMap::new(),
        }
    }

    /// Enrolls a user in a published course.
    ///
    /// # Errors
    ///
    /// - [`MarketplaceError::NotFound`] - the course does not exist.
    /// - [`MarketplaceError::NotAvailable`] - the course is not published.
    /// - [`MarketplaceError::AlreadyEnrolled`] - an enrollment for this
    ///   (user, course) pair already exists.
    pub fn enroll(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Enrollment, MarketplaceError> {
        self.create_enrollment(user_id, course_id, None)
    }

    /// Grants the enrollment a completed course payment paid for.
    ///
    /// Invoked by the event dispatcher, not by clients. An already enrolled
    /// user is absorbed as a no-op so that replayed payment events stay
    /// harmless.
    pub fn grant_from_payment(
        &self,
        payment: &Payment,
    ) -> Result<Option<Enrollment>, MarketplaceError> {
        let Some(course_id) = payment.target.course_id() else {
            return Ok(None);
        };

        match self.create_enrollment(payment.user_id, course_id, Some(payment)) {
            Ok(enrollment) => Ok(Some(enrollment)),
            Err(MarketplaceError::AlreadyEnrolled { user, course }) => {
                warn!(%user, %course, payment = %payment.id, "payment grant for existing enrollment, skipping");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn create_enrollment(
        &self,
        user_id: UserId,
        course_id: CourseId,
        payment: Option<&Payment>,
    ) -> Result<Enrollment, MarketplaceError> {
        let course = self
            .catalog
            .course(&course_id)
            .ok_or_else(|| MarketplaceError::not_found("course", course_id))?;

        if !course.is_published() {
            return Err(MarketplaceError::NotAvailable {
                course: course_id.to_string(),
            });
        }

        // Entry API gives an atomic check-and-insert: two racing enrolls
        // for the same (user, course) produce exactly one record.
        match self.by_user_course.entry((user_id, course_id)) {
            Entry::Occupied(_) => Err(MarketplaceError::AlreadyEnrolled {
                user: user_id.to_string(),
                course: course_id.to_string(),
            }),
            Entry::Vacant(entry) => {
                let enrollment = Enrollment {
                    id: EnrollmentId::new(),
                    user_id,
                    course_id,
                    status: EnrollmentStatus::Active,
                    progress: Decimal::ZERO,
                    completed_lessons: Vec::new(),
                    current_lesson: None,
                    time_spent: 0,
                    last_position: 0,
                    amount_paid: payment.map_or(course.price, |p| p.amount),
                    currency: course.currency.clone(),
                    payment_id: payment.map(|p| p.id),
                    certificate_id: None,
                    enrolled_at: Utc::now(),
                    completed_at: None,
                    last_accessed_at: None,
                };
                self.enrollments.insert(enrollment.id, enrollment.clone());
                entry.insert(enrollment.id);
                Ok(enrollment)
            }
        }
    }

    /// Records a lesson completion and recomputes progress.
    ///
    /// Completing the same lesson twice has no additional effect. When the
    /// recomputed progress reaches 100 the enrollment transitions to
    /// `Completed` exactly once and an [`MarketEvent::EnrollmentCompleted`]
    /// event is queued for certificate issuance.
    pub fn update_progress(
        &self,
        enrollment_id: EnrollmentId,
        user_id: UserId,
        lesson_id: LessonId,
        delta: &ProgressDelta,
    ) -> Result<Enrollment, MarketplaceError> {
        let mut enrollment = self
            .enrollments
            .get_mut(&enrollment_id)
            .filter(|e| e.user_id == user_id)
            .ok_or_else(|| MarketplaceError::not_found("enrollment", enrollment_id))?;

        let course = self
            .catalog
            .course(&enrollment.course_id)
            .ok_or_else(|| MarketplaceError::not_found("course", enrollment.course_id))?;

        if !enrollment.completed_lessons.contains(&lesson_id) {
            enrollment.completed_lessons.push(lesson_id);
        }

        if let Some(current) = delta.current_lesson {
            enrollment.current_lesson = Some(current);
        }
        if let Some(minutes) = delta.time_spent {
            enrollment.time_spent += minutes;
        }
        if let Some(position) = delta.position {
            enrollment.last_position = position;
        }

        enrollment.progress =
            progress_percentage(enrollment.completed_lessons.len(), course.total_lessons());

        if enrollment.progress >= dec!(100) && enrollment.status != EnrollmentStatus::Completed {
            enrollment.status = EnrollmentStatus::Completed;
            enrollment.completed_at = Some(Utc::now());
            self.outbox
                .push(MarketEvent::EnrollmentCompleted { enrollment_id });
        }

        enrollment.last_accessed_at = Some(Utc::now());

        Ok(enrollment.clone())
    }

    /// Retrieves a lesson, enforcing the access rules.
    ///
    /// Preview lessons are public. Everything else requires a live (not
    /// dropped) enrollment in the owning course; anonymous callers only get
    /// previews.
    pub fn get_lesson(
        &self,
        lesson_id: LessonId,
        user_id: Option<UserId>,
    ) -> Result<Lesson, MarketplaceError> {
        let lesson_ref = self
            .catalog
            .lesson(&lesson_id)
            .ok_or_else(|| MarketplaceError::not_found("lesson", lesson_id))?;

        if lesson_ref.lesson.is_preview {
            return Ok(lesson_ref.lesson);
        }

        let Some(user_id) = user_id else {
            return Err(MarketplaceError::Forbidden {
                reason: format!("lesson {lesson_id} is not available for preview"),
            });
        };

        let enrolled = self
            .by_user_course
            .get(&(user_id, lesson_ref.course_id))
            .map(|id| *id)
            .and_then(|id| self.enrollments.get(&id))
            .is_some_and(|e| e.grants_access());

        if !enrolled {
            return Err(MarketplaceError::Forbidden {
                reason: format!("enroll in course {} to access this lesson", lesson_ref.course_id),
            });
        }

        Ok(lesson_ref.lesson)
    }

    /// Course recommendations based on the categories the user studies.
    ///
    /// Falls back to the popularity ranking for users with no enrollments.
    pub fn recommended(&self, user_id: UserId, limit: usize) -> Vec<Course> {
        let mut categories: Vec<String> = Vec::new();
        for enrollment in self.enrollments_for(user_id) {
            if let Some(course) = self.catalog.course(&enrollment.course_id)
                && !categories.contains(&course.category)
            {
                categories.push(course.category);
            }
        }

        if categories.is_empty() {
            self.catalog.popular(limit)
        } else {
            self.catalog.published_in_categories(&categories, limit)
        }
    }

    /// The user's enrollments, most recent first.
    pub fn enrollments_for(&self, user_id: UserId) -> Vec<Enrollment> {
        let mut enrollments: Vec<Enrollment> = self
            .enrollments
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.clone())
            .collect();
        enrollments.sort_by_key(|e| std::cmp::Reverse(e.enrolled_at));
        enrollments
    }

    /// Retrieves an enrollment owned by the user.
    pub fn get(
        &self,
        enrollment_id: EnrollmentId,
        user_id: UserId,
    ) -> Result<Enrollment, MarketplaceError> {
        self.enrollments
            .get(&enrollment_id)
            .filter(|e| e.user_id == user_id)
            .map(|e| e.clone())
            .ok_or_else(|| MarketplaceError::not_found("enrollment", enrollment_id))
    }

    /// Snapshot of an enrollment regardless of owner (dispatcher use).
    pub(crate) fn snapshot(
        &self,
        enrollment_id: EnrollmentId,
    ) -> Result<Enrollment, MarketplaceError> {
        self.enrollments
            .get(&enrollment_id)
            .map(|e| e.clone())
            .ok_or_else(|| MarketplaceError::not_found("enrollment", enrollment_id))
    }

    /// All enrollments, unordered (report output).
    pub fn all(&self) -> Vec<Enrollment> {
        self.enrollments.iter().map(|e| e.clone()).collect()
    }

    pub fn pause(
        &self,
        enrollment_id: EnrollmentId,
        user_id: UserId,
    ) -> Result<Enrollment, MarketplaceError> {
        self.transition(enrollment_id, user_id, &[EnrollmentStatus::Active], EnrollmentStatus::Paused)
    }

    pub fn resume(
        &self,
        enrollment_id: EnrollmentId,
        user_id: UserId,
    ) -> Result<Enrollment, MarketplaceError> {
        self.transition(enrollment_id, user_id, &[EnrollmentStatus::Paused], EnrollmentStatus::Active)
    }

    pub fn drop_enrollment(
        &self,
        enrollment_id: EnrollmentId,
        user_id: UserId,
    ) -> Result<Enrollment, MarketplaceError> {
        self.transition(
            enrollment_id,
            user_id,
            &[EnrollmentStatus::Active, EnrollmentStatus::Paused],
            EnrollmentStatus::Dropped,
        )
    }

    fn transition(
        &self,
        enrollment_id: EnrollmentId,
        user_id: UserId,
        from: &[EnrollmentStatus],
        to: EnrollmentStatus,
    ) -> Result<Enrollment, MarketplaceError> {
        let mut enrollment = self
            .enrollments
            .get_mut(&enrollment_id)
            .filter(|e| e.user_id == user_id)
            .ok_or_else(|| MarketplaceError::not_found("enrollment", enrollment_id))?;

        if !from.contains(&enrollment.status) {
            return Err(MarketplaceError::invalid_state(
                "enrollment",
                enrollment_id,
                enrollment.status,
                match to {
                    EnrollmentStatus::Paused => "active",
                    EnrollmentStatus::Active => "paused",
                    _ => "active or paused",
                },
            ));
        }

        enrollment.status = to;
        Ok(enrollment.clone())
    }

    /// Stamps the certificate link after issuance (dispatcher use).
    pub(crate) fn attach_certificate(
        &self,
        enrollment_id: EnrollmentId,
        certificate_id: CertificateId,
    ) {
        if let Some(mut enrollment) = self.enrollments.get_mut(&enrollment_id) {
            enrollment.certificate_id = Some(certificate_id);
        }
    }
}
