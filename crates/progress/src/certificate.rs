//! Verification code generation for certificates.

use rand::Rng;
use academy_core::VerificationCode;
use crate::config::TrackerConfig;

/// Draw a fresh random verification code.
///
/// With the default 12 symbols from a 32-symbol alphabet there are 2^60
/// possible codes; the tracker still checks the code is unused before
/// issuing it.
pub fn generate_verification_code(config: &TrackerConfig) -> VerificationCode {
    let mut rng = rand::rng();
    let alphabet = VerificationCode::ALPHABET;
    let symbols: String = (0..config.verification_code_length.max(1))
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect();

    VerificationCode::from_parts(&config.verification_code_prefix, &symbols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_code_shape() {
        let code = generate_verification_code(&TrackerConfig::default());
        let parts: Vec<_> = code.as_str().split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "VA");
        assert!(parts[1..].iter().all(|p| p.len() == 4));
        assert!(parts[1..]
            .iter()
            .flat_map(|p| p.bytes())
            .all(|b| VerificationCode::ALPHABET.contains(&b)));
    }

    #[test]
    fn test_codes_do_not_repeat() {
        let config = TrackerConfig::default();
        let codes: HashSet<_> = (0..1000).map(|_| generate_verification_code(&config)).collect();
        assert_eq!(codes.len(), 1000);
    }

    #[test]
    fn test_empty_prefix() {
        let config = TrackerConfig {
            verification_code_prefix: String::new(),
            verification_code_length: 8,
            ..Default::default()
        };
        assert_eq!(generate_verification_code(&config).as_str().len(), 9);
    }
}
