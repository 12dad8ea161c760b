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

//! Error types for payment and enrollment processing.

use rust_decimal::Decimal;
use thiserror::Error;

/// Payment and enrollment processing errors.
///
/// Every variant carries enough context (entity kind, identifier) to log
/// and display the failure without consulting the call site.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketplaceError {
    /// A referenced entity does not exist (or is not owned by the caller).
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Payment amount does not match the live catalog price.
    #[error("invalid payment amount: expected {expected}, got {actual}")]
    InvalidAmount { expected: Decimal, actual: Decimal },

    /// The entity is not in a state that permits the attempted operation.
    #[error("{entity} {id} is in state {state}, operation requires {required}")]
    InvalidState {
        entity: &'static str,
        id: String,
        state: String,
        required: &'static str,
    },

    /// The payment is flagged non-refundable or was already refunded.
    #[error("payment {id} is not refundable")]
    NotRefundable { id: String },

    /// An enrollment for this (user, course) pair already exists.
    #[error("user {user} is already enrolled in course {course}")]
    AlreadyEnrolled { user: String, course: String },

    /// The course is not published and cannot be enrolled in.
    #[error("course {course} is not available for enrollment")]
    NotAvailable { course: String },

    /// The caller has no access grant for the requested content.
    #[error("forbidden: {reason}")]
    Forbidden { reason: String },

    /// Phone number is not a valid mobile-money subscriber number.
    #[error("invalid mobile-money phone number: {number}")]
    InvalidPhoneNumber { number: String },

    /// The payment gateway was unreachable or rejected the request.
    ///
    /// The affected payment keeps its current state; retry is the
    /// caller's responsibility.
    #[error("gateway error: {message}")]
    GatewayError { message: String },

    /// Authenticity check on an inbound gateway callback failed.
    #[error("invalid gateway callback signature")]
    InvalidSignature,
}

impl MarketplaceError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(
        entity: &'static str,
        id: impl ToString,
        state: impl ToString,
        required: &'static str,
    ) -> Self {
        Self::InvalidState {
            entity,
            id: id.to_string(),
            state: state.to_string(),
            required,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MarketplaceError;
    use rust_decimal_macros::dec;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            MarketplaceError::not_found("course", "abc").to_string(),
            "course not found: abc"
        );
        assert_eq!(
            MarketplaceError::InvalidAmount {
                expected: dec!(1500),
                actual: dec!(100)
            }
            .to_string(),
            "invalid payment amount: expected 1500, got 100"
        );
        assert_eq!(
            MarketplaceError::invalid_state("payment", "p1", "failed", "pending").to_string(),
            "payment p1 is in state failed, operation requires pending"
        );
        assert_eq!(
            MarketplaceError::NotRefundable {
                id: "p1".to_string()
            }
            .to_string(),
            "payment p1 is not refundable"
        );
        assert_eq!(
            MarketplaceError::InvalidSignature.to_string(),
            "invalid gateway callback signature"
        );
    }

    #[test]
    fn errors_are_cloneable() {
        let error = MarketplaceError::InvalidSignature;
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
