//! Callback signature verification.
//!
//! Every gateway callback carries an HMAC-SHA256 over its own parameters,
//! keyed with the shared secret from the merchant cabinet. A callback whose
//! signature does not verify is rejected before anything is read from
//! storage.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::models::callback::{ACTION_COMPLETE, ACTION_PREPARE, CompleteCallback, PrepareCallback};

type HmacSha256 = Hmac<Sha256>;

/// Why a callback failed verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The callback names a service id this deployment does not serve.
    #[error("unknown service id: {0}")]
    UnknownServiceId(i64),

    /// Signature absent from the keyed digest, or not valid hex at all.
    #[error("signature check failed")]
    BadSignature,
}

/// Verifies the signature and service id on incoming callbacks.
///
/// # Signed Message
///
/// The signature covers the concatenation of the callback's own fields, in
/// order and without separators:
///
/// ```text
/// prepare:  gateway_trans_id + service_id + merchant_trans_id
///           + amount + action + sign_time
/// complete: gateway_trans_id + service_id + merchant_trans_id
///           + merchant_prepare_id + amount + action + sign_time
/// ```
///
/// `sign_string` is the lowercase hex encoding of
/// `HMAC-SHA256(secret, message)`.
///
/// # Replay
///
/// `sign_time` is part of the signed message but its age is not checked:
/// every accepted callback is idempotent downstream, so a replayed valid
/// signature cannot change any outcome, while a freshness window would
/// reject the gateway's own legitimate retries.
#[derive(Debug, Clone)]
pub struct SignatureValidator {
    secret: String,
    service_id: i64,
}

impl SignatureValidator {
    pub fn new(secret: impl Into<String>, service_id: i64) -> Self {
        Self {
            secret: secret.into(),
            service_id,
        }
    }

    /// The service id this deployment accepts callbacks for.
    pub fn service_id(&self) -> i64 {
        self.service_id
    }

    /// Check a prepare callback's service id and signature.
    pub fn verify_prepare(&self, cb: &PrepareCallback) -> Result<(), ValidationError> {
        if cb.service_id != self.service_id {
            return Err(ValidationError::UnknownServiceId(cb.service_id));
        }
        let message = format!(
            "{}{}{}{}{}{}",
            cb.gateway_trans_id,
            cb.service_id,
            cb.merchant_trans_id,
            cb.amount,
            ACTION_PREPARE,
            cb.sign_time
        );
        self.verify(&message, &cb.sign_string)
    }

    /// Check a complete callback's service id and signature.
    ///
    /// The message additionally covers `merchant_prepare_id`, so a prepare
    /// signature can never be replayed as a complete.
    pub fn verify_complete(&self, cb: &CompleteCallback) -> Result<(), ValidationError> {
        if cb.service_id != self.service_id {
            return Err(ValidationError::UnknownServiceId(cb.service_id));
        }
        let message = format!(
            "{}{}{}{}{}{}{}",
            cb.gateway_trans_id,
            cb.service_id,
            cb.merchant_trans_id,
            cb.merchant_prepare_id,
            cb.amount,
            ACTION_COMPLETE,
            cb.sign_time
        );
        self.verify(&message, &cb.sign_string)
    }

    /// Constant-time comparison via `Mac::verify_slice`; never compares
    /// signature strings directly.
    fn verify(&self, message: &str, presented: &str) -> Result<(), ValidationError> {
        let presented = hex::decode(presented).map_err(|_| ValidationError::BadSignature)?;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| ValidationError::BadSignature)?;
        mac.update(message.as_bytes());
        mac.verify_slice(&presented)
            .map_err(|_| ValidationError::BadSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "merchant-cabinet-secret";
    const SERVICE_ID: i64 = 12345;

    fn sign_with(secret: &str, parts: &[&str]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        for part in parts {
            mac.update(part.as_bytes());
        }
        hex::encode(mac.finalize().into_bytes())
    }

    fn prepare_callback() -> PrepareCallback {
        let sign_string = sign_with(
            SECRET,
            &[
                "gtx-1",
                "12345",
                "ref-1",
                "1500000",
                "0",
                "2026-08-26 12:00:00",
            ],
        );
        PrepareCallback {
            gateway_trans_id: "gtx-1".to_string(),
            service_id: SERVICE_ID,
            merchant_trans_id: "ref-1".to_string(),
            amount: 1_500_000,
            sign_time: "2026-08-26 12:00:00".to_string(),
            sign_string,
        }
    }

    #[test]
    fn valid_prepare_signature_verifies() {
        let validator = SignatureValidator::new(SECRET, SERVICE_ID);
        assert_eq!(validator.verify_prepare(&prepare_callback()), Ok(()));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let validator = SignatureValidator::new("some-other-secret", SERVICE_ID);
        assert_eq!(
            validator.verify_prepare(&prepare_callback()),
            Err(ValidationError::BadSignature)
        );
    }

    #[test]
    fn tampered_amount_breaks_the_signature() {
        let validator = SignatureValidator::new(SECRET, SERVICE_ID);
        let mut cb = prepare_callback();
        cb.amount += 1;
        assert_eq!(
            validator.verify_prepare(&cb),
            Err(ValidationError::BadSignature)
        );
    }

    #[test]
    fn malformed_hex_is_rejected_not_panicked_on() {
        let validator = SignatureValidator::new(SECRET, SERVICE_ID);
        let mut cb = prepare_callback();
        cb.sign_string = "not hex at all".to_string();
        assert_eq!(
            validator.verify_prepare(&cb),
            Err(ValidationError::BadSignature)
        );
    }

    #[test]
    fn foreign_service_id_is_rejected_before_the_hmac() {
        let validator = SignatureValidator::new(SECRET, SERVICE_ID);
        let mut cb = prepare_callback();
        cb.service_id = 99999;
        assert_eq!(
            validator.verify_prepare(&cb),
            Err(ValidationError::UnknownServiceId(99999))
        );
    }

    #[test]
    fn complete_signature_covers_the_prepare_echo() {
        let validator = SignatureValidator::new(SECRET, SERVICE_ID);
        let signed = sign_with(
            SECRET,
            &[
                "gtx-1",
                "12345",
                "ref-1",
                "prep-77",
                "1500000",
                "1",
                "2026-08-26 12:05:00",
            ],
        );
        let cb = CompleteCallback {
            gateway_trans_id: "gtx-1".to_string(),
            service_id: SERVICE_ID,
            merchant_trans_id: "ref-1".to_string(),
            merchant_prepare_id: "prep-77".to_string(),
            amount: 1_500_000,
            error: 0,
            sign_time: "2026-08-26 12:05:00".to_string(),
            sign_string: signed,
        };
        assert_eq!(validator.verify_complete(&cb), Ok(()));

        let mut wrong_echo = cb.clone();
        wrong_echo.merchant_prepare_id = "prep-78".to_string();
        assert_eq!(
            validator.verify_complete(&wrong_echo),
            Err(ValidationError::BadSignature)
        );
    }
}
