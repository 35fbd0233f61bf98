use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha1 = Hmac<Sha1>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("failed to initialize HMAC-SHA1")]
    InvalidKey,
    #[error("signature is not valid hex")]
    Encoding,
    #[error("signature mismatch")]
    Mismatch,
}

fn mac_for(secret: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha1, SignatureError> {
    let mut mac =
        HmacSha1::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(timestamp.as_bytes());
    mac.update(b" ");
    mac.update(body);
    Ok(mac)
}

/// Hex HMAC-SHA1 of `"{timestamp} {body}"`. `timestamp` must be the exact text
/// placed in the auth header, not a re-rendered float.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> Result<String, SignatureError> {
    let mac = mac_for(secret, timestamp, body)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a client supplied hex signature in constant time.
pub fn verify(
    signature: &str,
    timestamp: &str,
    body: &[u8],
    secret: &str,
) -> Result<(), SignatureError> {
    let supplied = hex::decode(signature.trim()).map_err(|_| SignatureError::Encoding)?;
    let expected = mac_for(secret, timestamp, body)?.finalize().into_bytes();

    if bool::from(expected.as_slice().ct_eq(supplied.as_slice())) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}
