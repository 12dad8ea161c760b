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

//! Payment processing engine.
//!
//! The [`PaymentProcessor`] validates purchase requests against the
//! catalog, derives fees and taxes from the [`FeeSchedule`], and carries
//! each payment through its lifecycle. The actual transfer is delegated to
//! the [`MobileMoneyGateway`] adapter; gateway callbacks arrive
//! at-least-once and are absorbed idempotently.
//!
//! # Invariants
//!
//! - A payment amount never diverges from the catalog price at creation.
//! - Transaction references are globally unique.
//! - Status transitions are monotonic; a settled callback replay is a
//!   no-op, never a second application.

use crate::base::{PaymentId, UserId};
use crate::catalog::Catalog;
use crate::error::MarketplaceError;
use crate::events::{EventOutbox, MarketEvent};
use crate::gateway::{GatewayCallback, GatewayStatus, MobileMoneyGateway, validate_phone_number};
use crate::payment::{
    FeeSchedule, MethodDetails, Payment, PaymentMethod, PaymentStatus, PaymentTarget, RefundInfo,
    transaction_reference,
};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Deployment environment. Callback signature checks are skipped in
/// `Sandbox`, where the gateway does not sign payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Sandbox,
    Production,
}

/// Per-user payment aggregates.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PaymentStats {
    /// Sum of total amounts (base + fee + tax) over completed payments.
    pub total_spent: Decimal,
    pub completed: usize,
    pub pending: usize,
    pub failed: usize,
    pub refunded: usize,
}

/// Payment processing engine.
pub struct PaymentProcessor {
    catalog: Arc<dyn Catalog>,
    gateway: Arc<dyn MobileMoneyGateway>,
    fees: FeeSchedule,
    environment: Environment,
    outbox: Arc<EventOutbox>,
    /// Payment records indexed by id.
    payments: DashMap<PaymentId, Payment>,
    /// Transaction reference -> payment id, for callback correlation.
    by_reference: DashMap<String, PaymentId>,
}

impl PaymentProcessor {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        gateway: Arc<dyn MobileMoneyGateway>,
        fees: FeeSchedule,
        environment: Environment,
        outbox: Arc<EventOutbox>,
    ) -> Self {
        Self {
            catalog,
            gateway,
            fees,
            environment,
            outbox,
            payments: DashMap::new(),
            by_reference: DashMap::new(),
        }
    }

    /// Creates a `Pending` payment for a course, module, or wallet top-up.
    ///
    /// No money moves here: mobile-money transfers start with
    /// [`initiate_mobile_money`](Self::initiate_mobile_money) and settle
    /// through the gateway callback.
    ///
    /// # Errors
    ///
    /// - [`MarketplaceError::NotFound`] - the target course/module is absent.
    /// - [`MarketplaceError::InvalidAmount`] - amount differs from the live
    ///   catalog price (top-ups instead require a positive amount).
    /// - [`MarketplaceError::InvalidPhoneNumber`] - malformed mobile-money
    ///   subscriber number.
    pub fn create_payment(
        &self,
        user_id: UserId,
        target: PaymentTarget,
        amount: Decimal,
        details: &MethodDetails,
    ) -> Result<Payment, MarketplaceError> {
        let (expected, currency) = match target {
            PaymentTarget::Course(course_id) => {
                let course = self
                    .catalog
                    .course(&course_id)
                    .ok_or_else(|| MarketplaceError::not_found("course", course_id))?;
                (Some(course.price), course.currency)
            }
            PaymentTarget::Module(module_id) => {
                let module = self
                    .catalog
                    .module(&module_id)
                    .ok_or_else(|| MarketplaceError::not_found("module", module_id))?;
                (Some(module.module.price), module.currency)
            }
            PaymentTarget::WalletTopUp => (None, "MZN".to_string()),
        };

        match expected {
            Some(price) if amount != price => {
                return Err(MarketplaceError::InvalidAmount {
                    expected: price,
                    actual: amount,
                });
            }
            None if amount <= Decimal::ZERO => {
                return Err(MarketplaceError::InvalidAmount {
                    expected: Decimal::ZERO,
                    actual: amount,
                });
            }
            _ => {}
        }

        let phone_number = match details {
            MethodDetails::MobileMoney { phone_number } => {
                Some(validate_phone_number(phone_number)?)
            }
            MethodDetails::Card | MethodDetails::Wallet => None,
        };

        let method = details.method();
        let id = PaymentId::new();

        // Entry API gives an atomic check-and-insert so a reference is
        // never assigned twice.
        let reference = loop {
            let candidate = transaction_reference("PAY");
            if let Entry::Vacant(entry) = self.by_reference.entry(candidate.clone()) {
                entry.insert(id);
                break candidate;
            }
        };

        let payment = Payment {
            id,
            user_id,
            target,
            amount,
            currency,
            method,
            status: PaymentStatus::Pending,
            reference,
            gateway_transaction_id: None,
            phone_number,
            failure_reason: None,
            fee: self.fees.fee(method, amount),
            tax: self.fees.tax(amount),
            refundable: target != PaymentTarget::WalletTopUp,
            refund: None,
            created_at: Utc::now(),
            processed_at: None,
        };

        self.payments.insert(id, payment.clone());
        Ok(payment)
    }

    /// Pushes a pending mobile-money payment to the gateway.
    ///
    /// Records the gateway's conversation id until the callback supplies
    /// the final transaction id. A gateway failure leaves the payment
    /// `Pending`; retry is the caller's decision.
    pub fn initiate_mobile_money(
        &self,
        payment_id: PaymentId,
        user_id: UserId,
    ) -> Result<String, MarketplaceError> {
        let (phone_number, total, reference) = {
            let payment = self
                .payments
                .get(&payment_id)
                .filter(|p| p.user_id == user_id)
                .ok_or_else(|| MarketplaceError::not_found("payment", payment_id))?;

            if payment.status != PaymentStatus::Pending {
                return Err(MarketplaceError::invalid_state(
                    "payment",
                    payment_id,
                    payment.status,
                    "pending",
                ));
            }
            if payment.method != PaymentMethod::MobileMoney {
                return Err(MarketplaceError::invalid_state(
                    "payment",
                    payment_id,
                    payment.method,
                    "mobile_money method",
                ));
            }
            let phone = payment.phone_number.clone().ok_or_else(|| {
                MarketplaceError::InvalidPhoneNumber {
                    number: String::new(),
                }
            })?;
            (phone, payment.total_amount(), payment.reference.clone())
        };

        // Outbound call happens outside the row lock.
        let conversation_id = self.gateway.initiate(&phone_number, total, &reference)?;

        if let Some(mut payment) = self.payments.get_mut(&payment_id) {
            payment.gateway_transaction_id = Some(conversation_id.clone());
        }
        info!(payment = %payment_id, conversation = %conversation_id, "mobile-money transfer initiated");
        Ok(conversation_id)
    }

    /// Applies an inbound gateway callback.
    ///
    /// Idempotent under at-least-once delivery: a callback for an already
    /// settled payment is logged and absorbed as a no-op.
    ///
    /// # Errors
    ///
    /// - [`MarketplaceError::InvalidSignature`] - authenticity check failed
    ///   (production only; no state change).
    /// - [`MarketplaceError::NotFound`] - no payment for the reference.
    pub fn confirm_gateway_callback(
        &self,
        callback: &GatewayCallback,
    ) -> Result<Payment, MarketplaceError> {
        if self.environment == Environment::Production
            && !self.gateway.validate_signature(callback)
        {
            return Err(MarketplaceError::InvalidSignature);
        }

        let payment_id = *self
            .by_reference
            .get(&callback.reference)
            .ok_or_else(|| MarketplaceError::not_found("payment", &callback.reference))?;

        let mut payment = self
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| MarketplaceError::not_found("payment", payment_id))?;

        if payment.status != PaymentStatus::Pending {
            // At-least-once delivery: replays of a settled callback are
            // accepted without touching the record.
            debug!(
                payment = %payment_id,
                status = %payment.status,
                "callback replay for settled payment, absorbing"
            );
            return Ok(payment.clone());
        }

        if callback.is_success() {
            payment.status = PaymentStatus::Completed;
            payment.gateway_transaction_id = Some(callback.transaction_id.clone());
            payment.processed_at = Some(Utc::now());
            self.outbox
                .push(MarketEvent::PaymentCompleted { payment_id });
            info!(payment = %payment_id, gateway_txn = %callback.transaction_id, "payment completed");
        } else {
            payment.status = PaymentStatus::Failed;
            payment.failure_reason = Some(if callback.response_desc.is_empty() {
                format!("gateway declined with code {}", callback.response_code)
            } else {
                callback.response_desc.clone()
            });
            warn!(
                payment = %payment_id,
                code = %callback.response_code,
                "payment failed"
            );
        }

        Ok(payment.clone())
    }

    /// Pull-based settlement check against the gateway's status endpoint.
    ///
    /// Applies the same transition rules as the callback path. A gateway
    /// status of `Pending` leaves the payment untouched.
    pub fn verify_payment(
        &self,
        payment_id: PaymentId,
        user_id: UserId,
        gateway_transaction_id: &str,
    ) -> Result<Payment, MarketplaceError> {
        {
            let payment = self
                .payments
                .get(&payment_id)
                .filter(|p| p.user_id == user_id)
                .ok_or_else(|| MarketplaceError::not_found("payment", payment_id))?;

            if payment.status != PaymentStatus::Pending {
                return Err(MarketplaceError::invalid_state(
                    "payment",
                    payment_id,
                    payment.status,
                    "pending",
                ));
            }
        }

        let status = self.gateway.verify(gateway_transaction_id)?;

        let mut payment = self
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| MarketplaceError::not_found("payment", payment_id))?;

        // Re-check under the row lock: a callback may have settled the
        // payment while the gateway call was in flight.
        if payment.status != PaymentStatus::Pending {
            return Ok(payment.clone());
        }

        match status {
            GatewayStatus::Completed => {
                payment.status = PaymentStatus::Completed;
                payment.gateway_transaction_id = Some(gateway_transaction_id.to_string());
                payment.processed_at = Some(Utc::now());
                self.outbox
                    .push(MarketEvent::PaymentCompleted { payment_id });
            }
            GatewayStatus::Failed => {
                payment.status = PaymentStatus::Failed;
                payment.failure_reason = Some("gateway verification failed".to_string());
            }
            GatewayStatus::Pending => {}
        }

        Ok(payment.clone())
    }

    /// Refunds a completed payment through the gateway's reversal
    /// operation.
    ///
    /// The full charge (base + fee + tax) is returned. The transition to
    /// `Refunded` happens only after the adapter accepts the reversal; on
    /// adapter failure the payment stays `Completed` and the error is
    /// surfaced — there is no automatic retry.
    pub fn refund(
        &self,
        payment_id: PaymentId,
        reason: &str,
        actor: UserId,
    ) -> Result<Payment, MarketplaceError> {
        let (gateway_txn, total) = {
            let payment = self
                .payments
                .get(&payment_id)
                .filter(|p| p.user_id == actor)
                .ok_or_else(|| MarketplaceError::not_found("payment", payment_id))?;

            if payment.status != PaymentStatus::Completed {
                return Err(MarketplaceError::invalid_state(
                    "payment",
                    payment_id,
                    payment.status,
                    "completed",
                ));
            }
            if !payment.can_be_refunded() {
                return Err(MarketplaceError::NotRefundable {
                    id: payment_id.to_string(),
                });
            }

            let txn = payment
                .gateway_transaction_id
                .clone()
                .unwrap_or_else(|| payment.reference.clone());
            (txn, payment.total_amount())
        };

        // Reversal happens outside the row lock.
        let accepted = self.gateway.reverse(&gateway_txn, total, reason)?;
        if !accepted {
            return Err(MarketplaceError::GatewayError {
                message: format!("reversal rejected for payment {payment_id}"),
            });
        }

        let mut payment = self
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| MarketplaceError::not_found("payment", payment_id))?;

        // A concurrent refund may have won while the reversal was in
        // flight; the second caller loses.
        if !payment.can_be_refunded() {
            return Err(MarketplaceError::NotRefundable {
                id: payment_id.to_string(),
            });
        }

        payment.status = PaymentStatus::Refunded;
        payment.refundable = false;
        payment.refund = Some(RefundInfo {
            amount: total,
            reason: reason.to_string(),
            refunded_at: Utc::now(),
            reference: transaction_reference("REFUND"),
        });
        info!(payment = %payment_id, amount = %total, "payment refunded");

        Ok(payment.clone())
    }

    /// Retrieves a payment owned by the user.
    pub fn get_payment(
        &self,
        payment_id: PaymentId,
        user_id: UserId,
    ) -> Result<Payment, MarketplaceError> {
        self.payments
            .get(&payment_id)
            .filter(|p| p.user_id == user_id)
            .map(|p| p.clone())
            .ok_or_else(|| MarketplaceError::not_found("payment", payment_id))
    }

    /// Snapshot of a payment regardless of owner (dispatcher use).
    pub(crate) fn snapshot(&self, payment_id: PaymentId) -> Result<Payment, MarketplaceError> {
        self.payments
            .get(&payment_id)
            .map(|p| p.clone())
            .ok_or_else(|| MarketplaceError::not_found("payment", payment_id))
    }

    /// The user's payments, most recent first, optionally filtered by
    /// status.
    pub fn user_payments(&self, user_id: UserId, status: Option<PaymentStatus>) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self
            .payments
            .iter()
            .filter(|p| p.user_id == user_id)
            .filter(|p| status.is_none_or(|s| p.status == s))
            .map(|p| p.clone())
            .collect();
        payments.sort_by_key(|p| std::cmp::Reverse(p.created_at));
        payments
    }

    /// Aggregates the user's payments: total spent over completed
    /// payments plus counts per status. Pure read.
    pub fn stats(&self, user_id: UserId) -> PaymentStats {
        let mut stats = PaymentStats::default();
        for payment in self.payments.iter().filter(|p| p.user_id == user_id) {
            match payment.status {
                PaymentStatus::Completed => {
                    stats.total_spent += payment.total_amount();
                    stats.completed += 1;
                }
                PaymentStatus::Pending => stats.pending += 1,
                PaymentStatus::Failed => stats.failed += 1,
                PaymentStatus::Refunded => stats.refunded += 1,
            }
        }
        stats
    }

    /// All payments, unordered (report output).
    pub fn all(&self) -> Vec<Payment> {
        self.payments.iter().map(|p| p.clone()).collect()
    }
}
