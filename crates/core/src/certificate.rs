//! Certificate model - issued proof of course completion.

use serde::{Deserialize, Serialize};
use crate::id::{CertificateId, CourseId, UserId};
use crate::Time;

/// One per (user, course). Immutable once issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    /// Unique identifier
    pub id: CertificateId,

    /// Learner
    pub user_id: UserId,

    /// Completed course
    pub course_id: CourseId,

    /// Public code used to verify the certificate
    pub verification_code: VerificationCode,

    /// Issued at
    pub issued_at: Time,

    /// Reference to a signature image, if one was supplied
    pub signature: Option<String>,
}

impl Certificate {
    /// Build a certificate issued at `now`.
    pub fn new(
        user_id: UserId,
        course_id: CourseId,
        verification_code: VerificationCode,
        signature: Option<String>,
        now: Time,
    ) -> Self {
        Self {
            id: CertificateId::new(),
            user_id,
            course_id,
            verification_code,
            issued_at: now,
            signature,
        }
    }
}

/// Verification code printed on a certificate, e.g. `VA-7KQ2-M9XD-3HTR`.
///
/// Codes are stored in canonical upper case so lookups can be
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerificationCode(String);

impl VerificationCode {
    /// Symbols used in the random part of a code. Crockford base32, which
    /// leaves out I, L, O and U.
    pub const ALPHABET: &'static [u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

    /// Symbols per dash-separated group.
    pub const GROUP: usize = 4;

    /// Assemble a code from a prefix and random symbols drawn from
    /// [`Self::ALPHABET`].
    pub fn from_parts(prefix: &str, symbols: &str) -> Self {
        let groups: Vec<String> = symbols
            .as_bytes()
            .chunks(Self::GROUP)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect();

        let mut code = String::new();
        if !prefix.is_empty() {
            code.push_str(prefix);
            code.push('-');
        }
        code.push_str(&groups.join("-"));
        Self::parse(&code)
    }

    /// Canonicalize user input (trim, upper case).
    pub fn parse(s: &str) -> Self {
        Self(s.trim().to_ascii_uppercase())
    }

    /// Borrow the canonical code.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VerificationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_parts_groups_symbols() {
        let code = VerificationCode::from_parts("VA", "7KQ2M9XD3HTR");
        assert_eq!(code.as_str(), "VA-7KQ2-M9XD-3HTR");
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(
            VerificationCode::parse("  va-7kq2-m9xd "),
            VerificationCode::parse("VA-7KQ2-M9XD"),
        );
    }
}
