use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Verify a Meta webhook signature (`X-Hub-Signature-256` header, value
/// `sha256=<hex>` over the raw request body).
///
/// Any malformed header, bad hex, or digest mismatch yields `false`; the
/// caller treats all of them the same way. Comparison is constant-time.
///
/// See: <https://developers.facebook.com/docs/graph-api/webhooks/getting-started#verification-requests>
pub fn verify_webhook_signature(app_secret: &str, body: &[u8], signature_header: &str) -> bool {
    let Some(claimed) = signature_header
        .strip_prefix("sha256=")
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
    else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&claimed).is_ok()
}
