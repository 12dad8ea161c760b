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

//! Mobile-money gateway adapter.
//!
//! The engine never talks to the gateway's wire API directly;
//! [`MobileMoneyGateway`] is the seam. Implementations must bound every
//! outbound call with a timeout and surface a timeout as an error — the
//! engine treats any gateway failure as final and leaves retry/backoff to
//! the caller.

use crate::error::MarketplaceError;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Response code the gateway sends for a successful transfer.
pub const SUCCESS_CODE: &str = "INS-0";

/// Settlement state reported by the gateway's status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    Pending,
    Completed,
    Failed,
}

/// Inbound callback payload delivered by the gateway.
///
/// `reference` echoes the transaction reference we passed to
/// [`MobileMoneyGateway::initiate`] and is the correlation key back to the
/// payment. Delivery is at-least-once; the processor absorbs replays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayCallback {
    pub response_code: String,
    pub transaction_id: String,
    pub response_desc: String,
    pub reference: String,
    pub signed_data: Option<String>,
}

impl GatewayCallback {
    pub fn is_success(&self) -> bool {
        self.response_code == SUCCESS_CODE
    }
}

/// Outbound interface onto the mobile-money gateway.
pub trait MobileMoneyGateway: Send + Sync {
    /// Requests a customer-to-business transfer. Returns the gateway's
    /// conversation id for the request.
    fn initiate(
        &self,
        phone_number: &str,
        amount: Decimal,
        reference: &str,
    ) -> Result<String, MarketplaceError>;

    /// Polls the settlement state of a previously initiated transfer.
    fn verify(&self, gateway_transaction_id: &str) -> Result<GatewayStatus, MarketplaceError>;

    /// Reverses a settled transfer. `true` means the reversal was accepted.
    fn reverse(
        &self,
        gateway_transaction_id: &str,
        amount: Decimal,
        reason: &str,
    ) -> Result<bool, MarketplaceError>;

    /// Checks the authenticity of an inbound callback payload.
    fn validate_signature(&self, callback: &GatewayCallback) -> bool;
}

/// Normalizes a subscriber number to the `258…` international form.
pub fn normalize_phone_number(phone_number: &str) -> String {
    let digits: String = phone_number.chars().filter(char::is_ascii_digit).collect();
    if digits.starts_with("258") {
        digits
    } else if let Some(stripped) = digits.strip_prefix('8') {
        format!("2588{stripped}")
    } else {
        format!("258{digits}")
    }
}

/// Validates and normalizes a mobile-money subscriber number.
///
/// Valid numbers are 12 digits in the `258…` form after normalization.
pub fn validate_phone_number(phone_number: &str) -> Result<String, MarketplaceError> {
    let normalized = normalize_phone_number(phone_number);
    if normalized.len() != 12 || !normalized.starts_with("258") {
        return Err(MarketplaceError::InvalidPhoneNumber {
            number: phone_number.to_string(),
        });
    }
    Ok(normalized)
}

#[derive(Debug)]
struct SandboxState {
    initiate_error: Option<String>,
    verify_status: GatewayStatus,
    reverse_accepted: bool,
    initiated: Vec<String>,
}

/// Scriptable in-process gateway for the sandbox environment and tests.
///
/// Every operation succeeds by default; test code can script failure modes.
/// Signature validation always passes, matching the gateway sandbox which
/// does not sign callbacks.
#[derive(Debug)]
pub struct SandboxGateway {
    state: Mutex<SandboxState>,
    conversation_seq: AtomicU64,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SandboxState {
                initiate_error: None,
                verify_status: GatewayStatus::Completed,
                reverse_accepted: true,
                initiated: Vec::new(),
            }),
            conversation_seq: AtomicU64::new(1),
        }
    }

    /// Scripts the next `initiate` calls to fail with the given message.
    pub fn script_initiate_error(&self, message: impl Into<String>) {
        self.state.lock().initiate_error = Some(message.into());
    }

    /// Scripts the settlement state returned by `verify`.
    pub fn script_verify_status(&self, status: GatewayStatus) {
        self.state.lock().verify_status = status;
    }

    /// Scripts whether `reverse` is accepted.
    pub fn script_reverse_accepted(&self, accepted: bool) {
        self.state.lock().reverse_accepted = accepted;
    }

    /// References passed to `initiate`, in call order.
    pub fn initiated_references(&self) -> Vec<String> {
        self.state.lock().initiated.clone()
    }
}

impl Default for SandboxGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MobileMoneyGateway for SandboxGateway {
    fn initiate(
        &self,
        _phone_number: &str,
        _amount: Decimal,
        reference: &str,
    ) -> Result<String, MarketplaceError> {
        let mut state = self.state.lock();
        if let Some(message) = &state.initiate_error {
            return Err(MarketplaceError::GatewayError {
                message: message.clone(),
            });
        }
        state.initiated.push(reference.to_string());
        let seq = self.conversation_seq.fetch_add(1, Ordering::Relaxed);
        Ok(format!("SBX-{seq:08}"))
    }

    fn verify(&self, _gateway_transaction_id: &str) -> Result<GatewayStatus, MarketplaceError> {
        Ok(self.state.lock().verify_status)
    }

    fn reverse(
        &self,
        _gateway_transaction_id: &str,
        _amount: Decimal,
        _reason: &str,
    ) -> Result<bool, MarketplaceError> {
        Ok(self.state.lock().reverse_accepted)
    }

    fn validate_signature(&self, _callback: &GatewayCallback) -> bool {
        true
    }
}
