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

//! Core identifier types for users, catalog entities, payments, and
//! enrollments.
//!
//! All identifiers are opaque UUID newtypes. They serialize transparently
//! so records read naturally in JSON and CSV output.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type! {
    /// Unique identifier for a user account (student, instructor, or admin).
    UserId
}

id_type! {
    /// Unique identifier for a course in the catalog.
    CourseId
}

id_type! {
    /// Unique identifier for a module within a course.
    ModuleId
}

id_type! {
    /// Unique identifier for a lesson within a module.
    LessonId
}

id_type! {
    /// Unique identifier for a payment record.
    ///
    /// Distinct from the human-readable transaction reference (`PAY…`)
    /// used to correlate gateway callbacks.
    PaymentId
}

id_type! {
    /// Unique identifier for an enrollment record.
    EnrollmentId
}

id_type! {
    /// Unique identifier for an issued certificate.
    CertificateId
}
