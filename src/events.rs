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

//! Domain event outbox.
//!
//! Write paths never call their downstream consumers inline. They push an
//! event here and return; the marketplace facade drains the queue
//! afterwards. A progress update that triggers certificate issuance
//! therefore succeeds even when issuance fails — the failed event lands on
//! the dead-letter list and can be re-queued independently.

use crate::base::{EnrollmentId, PaymentId};
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;

/// Events emitted by the payment processor and enrollment manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketEvent {
    /// A payment reached `Completed`; course purchases grant an enrollment.
    PaymentCompleted { payment_id: PaymentId },
    /// An enrollment reached 100% progress; a certificate is minted.
    EnrollmentCompleted { enrollment_id: EnrollmentId },
}

/// FIFO outbox with a dead-letter list for failed dispatches.
///
/// Pushes are lock-free; only the dead-letter list takes a lock.
#[derive(Debug, Default)]
pub struct EventOutbox {
    queue: SegQueue<MarketEvent>,
    failed: Mutex<Vec<MarketEvent>>,
}

impl EventOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: MarketEvent) {
        self.queue.push(event);
    }

    pub fn pop(&self) -> Option<MarketEvent> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Parks an event whose dispatch failed.
    pub fn mark_failed(&self, event: MarketEvent) {
        self.failed.lock().push(event);
    }

    pub fn failed_events(&self) -> Vec<MarketEvent> {
        self.failed.lock().clone()
    }

    /// Moves every dead-lettered event back onto the queue for another
    /// dispatch attempt. Returns how many were re-queued.
    pub fn retry_failed(&self) -> usize {
        let mut failed = self.failed.lock();
        let count = failed.len();
        for event in failed.drain(..) {
            self.queue.push(event);
        }
        count
    }
}
