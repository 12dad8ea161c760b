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

//! Marketplace facade.
//!
//! Wires the payment processor, enrollment manager, and certificate issuer
//! to one event outbox and routes queued events between them:
//!
//! - `PaymentCompleted` grants the enrollment a course purchase paid for;
//! - `EnrollmentCompleted` mints a certificate and links it back.
//!
//! Dispatch runs after the write path that queued the event has already
//! returned, so a slow or failing certificate issuance can never fail the
//! progress update that triggered it. Events whose dispatch fails move to
//! the dead-letter list and can be re-queued with
//! [`Marketplace::retry_failed`].

use crate::catalog::Catalog;
use crate::certificate::CertificateIssuer;
use crate::enrollment::EnrollmentManager;
use crate::error::MarketplaceError;
use crate::events::{EventOutbox, MarketEvent};
use crate::gateway::MobileMoneyGateway;
use crate::payment::FeeSchedule;
use crate::processor::{Environment, PaymentProcessor};
use std::sync::Arc;
use tracing::{info, warn};

/// Central facade owning the payment and enrollment engines.
pub struct Marketplace {
    catalog: Arc<dyn Catalog>,
    outbox: Arc<EventOutbox>,
    payments: PaymentProcessor,
    enrollments: EnrollmentManager,
    certificates: CertificateIssuer,
}

impl Marketplace {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        gateway: Arc<dyn MobileMoneyGateway>,
        fees: FeeSchedule,
        environment: Environment,
    ) -> Self {
        let outbox = Arc::new(EventOutbox::new());
        Self {
            payments: PaymentProcessor::new(
                Arc::clone(&catalog),
                gateway,
                fees,
                environment,
                Arc::clone(&outbox),
            ),
            enrollments: EnrollmentManager::new(Arc::clone(&catalog), Arc::clone(&outbox)),
            certificates: CertificateIssuer::default(),
            catalog,
            outbox,
        }
    }

    pub fn payments(&self) -> &PaymentProcessor {
        &self.payments
    }

    pub fn enrollments(&self) -> &EnrollmentManager {
        &self.enrollments
    }

    pub fn certificates(&self) -> &CertificateIssuer {
        &self.certificates
    }

    /// The shared event outbox. Hosts that run dispatch from their own
    /// scheduler can inspect or feed it directly.
    pub fn outbox(&self) -> &EventOutbox {
        &self.outbox
    }

    /// Drains the outbox, routing each event to its consumer.
    ///
    /// Returns the number of events dispatched successfully. Failed events
    /// are warn-logged and parked on the dead-letter list; they never
    /// propagate an error to the caller.
    pub fn dispatch_pending(&self) -> usize {
        let mut dispatched = 0;
        while let Some(event) = self.outbox.pop() {
            match self.dispatch(event) {
                Ok(()) => dispatched += 1,
                Err(e) => {
                    warn!(?event, error = %e, "event dispatch failed, dead-lettering");
                    self.outbox.mark_failed(event);
                }
            }
        }
        dispatched
    }

    fn dispatch(&self, event: MarketEvent) -> Result<(), MarketplaceError> {
        match event {
            MarketEvent::PaymentCompleted { payment_id } => {
                let payment = self.payments.snapshot(payment_id)?;
                if let Some(enrollment) = self.enrollments.grant_from_payment(&payment)? {
                    info!(
                        payment = %payment_id,
                        enrollment = %enrollment.id,
                        "enrollment granted from payment"
                    );
                }
                Ok(())
            }
            MarketEvent::EnrollmentCompleted { enrollment_id } => {
                let enrollment = self.enrollments.snapshot(enrollment_id)?;
                let course_title = self
                    .catalog
                    .course(&enrollment.course_id)
                    .map(|c| c.title)
                    .ok_or_else(|| {
                        MarketplaceError::not_found("course", enrollment.course_id)
                    })?;
                let certificate = self.certificates.generate(&enrollment, &course_title)?;
                self.enrollments
                    .attach_certificate(enrollment_id, certificate.id);
                info!(
                    enrollment = %enrollment_id,
                    certificate = %certificate.id,
                    code = %certificate.verification_code,
                    "certificate issued"
                );
                Ok(())
            }
        }
    }

    /// Re-queues dead-lettered events for another dispatch attempt.
    pub fn retry_failed(&self) -> usize {
        self.outbox.retry_failed()
    }

    /// Events currently parked on the dead-letter list.
    pub fn failed_events(&self) -> Vec<MarketEvent> {
        self.outbox.failed_events()
    }
}
