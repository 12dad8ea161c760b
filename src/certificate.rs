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

//! Certificate issuance and public verification.
//!
//! A certificate is minted when an enrollment completes. Issuance is
//! idempotent per enrollment; anyone holding the verification code can look
//! the certificate up. Rendering (PDF, QR image) is a presentation concern
//! handled elsewhere — this module owns the verifiable record.

use crate::base::{CertificateId, CourseId, EnrollmentId, UserId};
use crate::enrollment::Enrollment;
use crate::error::MarketplaceError;
use crate::payment::transaction_reference;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A verifiable course-completion record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Certificate {
    pub id: CertificateId,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub enrollment_id: EnrollmentId,
    pub title: String,
    /// Public lookup code (`CERT…`) printed on the certificate.
    pub verification_code: String,
    /// URL encoded into the certificate's QR code.
    pub verify_url: String,
    pub issued_at: DateTime<Utc>,
}

/// Mints and verifies completion certificates.
pub struct CertificateIssuer {
    verify_base_url: String,
    certificates: DashMap<CertificateId, Certificate>,
    /// Verification code -> certificate id, for public lookup.
    by_code: DashMap<String, CertificateId>,
    /// Enrollment -> certificate id, making issuance idempotent.
    by_enrollment: DashMap<EnrollmentId, CertificateId>,
}

impl CertificateIssuer {
    pub fn new(verify_base_url: impl Into<String>) -> Self {
        Self {
            verify_base_url: verify_base_url.into(),
            certificates: DashMap::new(),
            by_code: DashMap::new(),
            by_enrollment: DashMap::new(),
        }
    }

    /// Mints a certificate for a completed enrollment.
    ///
    /// Returns the existing certificate if one was already issued for this
    /// enrollment.
    ///
    /// # Errors
    ///
    /// [`MarketplaceError::InvalidState`] - the enrollment has not reached
    /// 100% progress.
    pub fn generate(
        &self,
        enrollment: &Enrollment,
        course_title: &str,
    ) -> Result<Certificate, MarketplaceError> {
        if enrollment.progress < dec!(100) {
            return Err(MarketplaceError::invalid_state(
                "enrollment",
                enrollment.id,
                format!("{}% progress", enrollment.progress),
                "100% progress",
            ));
        }

        if let Some(existing) = self.by_enrollment.get(&enrollment.id) {
            if let Some(certificate) = self.certificates.get(&existing) {
                return Ok(certificate.clone());
            }
        }

        let verification_code = transaction_reference("CERT");
        let certificate = Certificate {
            id: CertificateId::new(),
            user_id: enrollment.user_id,
            course_id: enrollment.course_id,
            enrollment_id: enrollment.id,
            title: format!("Certificado de Conclusão - {course_title}"),
            verify_url: format!("{}/{}", self.verify_base_url, verification_code),
            verification_code: verification_code.clone(),
            issued_at: Utc::now(),
        };

        self.certificates.insert(certificate.id, certificate.clone());
        self.by_code.insert(verification_code, certificate.id);
        self.by_enrollment.insert(enrollment.id, certificate.id);
        Ok(certificate)
    }

    /// Public lookup by verification code.
    pub fn verify(&self, code: &str) -> Option<Certificate> {
        let id = *self.by_code.get(code)?;
        self.certificates.get(&id).map(|c| c.clone())
    }

    /// Certificate already issued for an enrollment, if any.
    pub fn for_enrollment(&self, enrollment_id: EnrollmentId) -> Option<Certificate> {
        let id = *self.by_enrollment.get(&enrollment_id)?;
        self.certificates.get(&id).map(|c| c.clone())
    }
}

impl Default for CertificateIssuer {
    fn default() -> Self {
        Self::new("https://aprendimoz.co.mz/verify")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrollment::EnrollmentStatus;
    use rust_decimal::Decimal;

    fn completed_enrollment() -> Enrollment {
        Enrollment {
            id: EnrollmentId::new(),
            user_id: UserId::new(),
            course_id: CourseId::new(),
            status: EnrollmentStatus::Completed,
            progress: dec!(100),
            completed_lessons: Vec::new(),
            current_lesson: None,
            time_spent: 120,
            last_position: 0,
            amount_paid: dec!(1500),
            currency: "MZN".to_string(),
            payment_id: None,
            certificate_id: None,
            enrolled_at: Utc::now(),
            completed_at: Some(Utc::now()),
            last_accessed_at: Some(Utc::now()),
        }
    }

    #[test]
    fn generates_verifiable_certificate() {
        let issuer = CertificateIssuer::default();
        let enrollment = completed_enrollment();

        let certificate = issuer.generate(&enrollment, "Rust Essentials").unwrap();
        assert!(certificate.verification_code.starts_with("CERT"));
        assert!(
            certificate
                .verify_url
                .ends_with(&certificate.verification_code)
        );

        let found = issuer.verify(&certificate.verification_code).unwrap();
        assert_eq!(found.id, certificate.id);
        assert_eq!(found.title, "Certificado de Conclusão - Rust Essentials");
    }

    #[test]
    fn issuance_is_idempotent_per_enrollment() {
        let issuer = CertificateIssuer::default();
        let enrollment = completed_enrollment();

        let first = issuer.generate(&enrollment, "Rust Essentials").unwrap();
        let second = issuer.generate(&enrollment, "Rust Essentials").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.verification_code, second.verification_code);
    }

    #[test]
    fn incomplete_enrollment_is_rejected() {
        let issuer = CertificateIssuer::default();
        let mut enrollment = completed_enrollment();
        enrollment.progress = Decimal::from(60);
        enrollment.status = EnrollmentStatus::Active;

        let result = issuer.generate(&enrollment, "Rust Essentials");
        assert!(matches!(
            result,
            Err(MarketplaceError::InvalidState { .. })
        ));
        assert!(issuer.for_enrollment(enrollment.id).is_none());
    }

    #[test]
    fn unknown_code_fails_verification() {
        let issuer = CertificateIssuer::default();
        assert!(issuer.verify("CERT000").is_none());
    }
}
