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

//! Payment records and pricing policy.
//!
//! A [`Payment`] is a financial audit record: it is created `Pending`,
//! moved to `Completed` or `Failed` by the gateway, may move from
//! `Completed` to `Refunded`, and is never deleted.
//!
//! Status transitions are monotonic:
//!
//  Pending ──callback ok──► Completed ──reversal──► Refunded
//     │
//     └──callback failed──► Failed

use crate::base::{CourseId, ModuleId, PaymentId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        };
        write!(f, "{s}")
    }
}

/// How the payment is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    MobileMoney,
    Card,
    Wallet,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::Card => "card",
            PaymentMethod::Wallet => "wallet",
        };
        write!(f, "{s}")
    }
}

/// Method selection plus the per-method details a purchase request carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum MethodDetails {
    MobileMoney { phone_number: String },
    Card,
    Wallet,
}

impl MethodDetails {
    pub fn method(&self) -> PaymentMethod {
        match self {
            MethodDetails::MobileMoney { .. } => PaymentMethod::MobileMoney,
            MethodDetails::Card => PaymentMethod::Card,
            MethodDetails::Wallet => PaymentMethod::Wallet,
        }
    }
}

/// What the payment buys: a course, a single module, or a wallet top-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTarget {
    Course(CourseId),
    Module(ModuleId),
    WalletTopUp,
}

impl PaymentTarget {
    pub fn course_id(&self) -> Option<CourseId> {
        match self {
            PaymentTarget::Course(id) => Some(*id),
            _ => None,
        }
    }
}

/// Reversal metadata recorded when a completed payment is refunded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundInfo {
    /// Full amount returned: base amount plus fee plus tax.
    pub amount: Decimal,
    pub reason: String,
    pub refunded_at: DateTime<Utc>,
    /// Reversal reference issued for the refund (`REFUND…`).
    pub reference: String,
}

/// A monetary transaction attempt and its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub user_id: UserId,
    pub target: PaymentTarget,
    pub amount: Decimal,
    pub currency: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    /// Globally unique reference handed to the gateway for correlation.
    pub reference: String,
    /// Transaction id assigned by the gateway once the transfer settles.
    pub gateway_transaction_id: Option<String>,
    /// Normalized subscriber number, mobile-money payments only.
    pub phone_number: Option<String>,
    pub failure_reason: Option<String>,
    /// Derived at creation from the fee schedule, never caller-supplied.
    pub fee: Decimal,
    /// Derived at creation from the fee schedule, never caller-supplied.
    pub tax: Decimal,
    pub refundable: bool,
    pub refund: Option<RefundInfo>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Amount the payer is charged: base amount plus fee plus tax.
    pub fn total_amount(&self) -> Decimal {
        self.amount + self.fee + self.tax
    }

    /// A payment can be refunded only when completed, flagged refundable,
    /// and not refunded yet.
    pub fn can_be_refunded(&self) -> bool {
        self.status == PaymentStatus::Completed && self.refundable && self.refund.is_none()
    }

    pub fn formatted_total(&self) -> String {
        format!("{} {}", self.currency, self.total_amount().round_dp(2))
    }
}

/// Generates a transaction reference: prefix, millisecond timestamp, and an
/// 8-hex random suffix, e.g. `PAY1754224516000A3F29B01`.
pub fn transaction_reference(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let random = Uuid::new_v4().simple().to_string();
    format!("{}{}{}", prefix, millis, random[..8].to_uppercase())
}

/// Fee and tax policy.
///
/// Rates are configuration: the processor takes a schedule at construction
/// rather than reading constants at call sites. Defaults match the
/// production policy: 2% for mobile-money, 2.9% + 0.30 fixed for card,
/// nothing for the internal wallet, 16% VAT on the base amount.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeSchedule {
    pub mobile_money_rate: Decimal,
    pub card_rate: Decimal,
    pub card_fixed: Decimal,
    pub vat_rate: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            mobile_money_rate: dec!(0.02),
            card_rate: dec!(0.029),
            card_fixed: dec!(0.30),
            vat_rate: dec!(0.16),
        }
    }
}

impl FeeSchedule {
    pub fn fee(&self, method: PaymentMethod, amount: Decimal) -> Decimal {
        match method {
            PaymentMethod::MobileMoney => amount * self.mobile_money_rate,
            PaymentMethod::Card => amount * self.card_rate + self.card_fixed,
            PaymentMethod::Wallet => Decimal::ZERO,
        }
    }

    /// Flat VAT on the base amount, identical for every method.
    pub fn tax(&self, amount: Decimal) -> Decimal {
        amount * self.vat_rate
    }
}
