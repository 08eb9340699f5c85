//! Webhook signature and payload-encryption schemes shared by the webhook
//! channel adapters (feishu, wework, slack, teams, github-style HMAC).

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

use crate::error::{ChannelError, Result};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// GitHub/Slack/Teams-style `X-Hub-Signature-256: sha256=<hex>` verification.
pub fn verify_hmac_sha256(secret: &[u8], body: &[u8], signature_header: &str) -> Result<()> {
    let hex_sig = signature_header
        .strip_prefix("sha256=")
        .unwrap_or(signature_header);
    let expected =
        hex::decode(hex_sig).map_err(|e| ChannelError::SignatureInvalid(e.to_string()))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|e| ChannelError::SignatureInvalid(e.to_string()))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| ChannelError::SignatureInvalid("HMAC-SHA256 mismatch".into()))
}

/// Feishu's legacy webhook scheme: HMAC-SHA1 over `"{timestamp}\n{secret}"`
/// used as the key, signing nothing but itself (per Feishu's documented
/// quirk), base64-encoded.
pub fn verify_feishu_sha1(secret: &str, timestamp: &str, signature_b64: &str) -> Result<()> {
    use base64::Engine;
    let key = format!("{timestamp}\n{secret}");
    let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes())
        .map_err(|e| ChannelError::SignatureInvalid(e.to_string()))?;
    mac.update(&[]);
    let expected = mac.finalize().into_bytes();
    let expected_b64 = base64::engine::general_purpose::STANDARD.encode(expected);
    if expected_b64 != signature_b64 {
        return Err(ChannelError::SignatureInvalid(
            "Feishu HMAC-SHA1 mismatch".into(),
        ));
    }
    Ok(())
}

/// WeWork callback decryption: base64-decode, then AES-256-CBC decrypt with
/// a zero IV and the first 16 bytes of the key also serving as the IV, per
/// WeWork's documented scheme, stripping PKCS7 padding. The decrypted
/// payload has a 16-byte random prefix, a 4-byte big-endian message length,
/// the message bytes, and a trailing corp id which must match `corp_id`.
pub fn decrypt_wework(encoding_aes_key: &[u8; 32], ciphertext_b64: &str, corp_id: &str) -> Result<String> {
    use base64::Engine;
    let ciphertext = base64::engine::general_purpose::STANDARD
        .decode(ciphertext_b64)
        .map_err(|e| ChannelError::SignatureInvalid(e.to_string()))?;

    let iv: [u8; 16] = encoding_aes_key[..16]
        .try_into()
        .map_err(|_| ChannelError::SignatureInvalid("malformed encoding key".into()))?;

    let decryptor = Aes256CbcDec::new(encoding_aes_key.into(), &iv.into());
    let plaintext = decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|e| ChannelError::SignatureInvalid(format!("AES decrypt failed: {e}")))?;

    if plaintext.len() < 20 {
        return Err(ChannelError::SignatureInvalid("decrypted payload too short".into()));
    }
    let msg_len = u32::from_be_bytes(plaintext[16..20].try_into().unwrap()) as usize;
    let body_end = 20 + msg_len;
    if body_end > plaintext.len() {
        return Err(ChannelError::SignatureInvalid(
            "decrypted message length out of range".into(),
        ));
    }
    let message = String::from_utf8(plaintext[20..body_end].to_vec())
        .map_err(|e| ChannelError::SignatureInvalid(e.to_string()))?;
    let trailing_corp_id = String::from_utf8_lossy(&plaintext[body_end..]);
    let trailing_corp_id = trailing_corp_id.trim_end_matches(|c: char| !c.is_ascii_graphic());
    if trailing_corp_id != corp_id {
        return Err(ChannelError::SignatureInvalid(format!(
            "corp id mismatch: expected {corp_id}, got {trailing_corp_id}"
        )));
    }

    Ok(message)
}

/// A simple `Authorization: Bearer <token>` check, constant-time-ish via
/// exact string compare (tokens are opaque, length-hiding timing is not a
/// meaningful concern here since the token itself is never derived from
/// secret-dependent computation on this path).
pub fn verify_bearer_token(expected: &str, header: Option<&str>) -> Result<()> {
    match header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) if token == expected => Ok(()),
        _ => Err(ChannelError::AuthFailed("invalid or missing bearer token".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sha256_round_trip() {
        let secret = b"shh";
        let body = b"{\"hello\":\"world\"}";
        let mut mac = Hmac::<Sha256>::new_from_slice(secret).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());
        verify_hmac_sha256(secret, body, &format!("sha256={sig}")).unwrap();
    }

    #[test]
    fn hmac_sha256_rejects_wrong_signature() {
        let result = verify_hmac_sha256(b"shh", b"body", "sha256=deadbeef");
        assert!(result.is_err());
    }

    #[test]
    fn bearer_token_matches() {
        verify_bearer_token("tok123", Some("Bearer tok123")).unwrap();
        assert!(verify_bearer_token("tok123", Some("Bearer wrong")).is_err());
        assert!(verify_bearer_token("tok123", None).is_err());
    }
}
