use crate::error::app_error::AppError;
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose};
use data_encoding::BASE32_NOPAD;
use qrcode::QrCode;
use totp_rs::{Algorithm, Secret, TOTP};

const TOTP_DIGITS: usize = 6;
const TOTP_STEP: u64 = 30; // 30 seconds
const TOTP_SKEW: u8 = 1; // one step either side
const SECRET_BYTES: usize = 20; // 160 bits
const NONCE_BYTES: usize = 12;

/// Generate a new TOTP secret (160 random bits, base32 encoded without padding)
pub fn generate_secret() -> String {
    let secret_bytes: [u8; SECRET_BYTES] = rand::random();
    BASE32_NOPAD.encode(&secret_bytes)
}

fn build_totp(secret: &str) -> Option<TOTP> {
    let secret_bytes = match Secret::Encoded(secret.to_string()).to_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!("rejecting malformed TOTP secret: {:?}", e);
            return None;
        }
    };

    match TOTP::new(Algorithm::SHA1, TOTP_DIGITS, TOTP_SKEW, TOTP_STEP, secret_bytes) {
        Ok(totp) => Some(totp),
        Err(e) => {
            tracing::debug!("rejecting unusable TOTP secret: {:?}", e);
            None
        }
    }
}

/// The 6-digit code for the 30-second step containing `unix_seconds`.
pub fn generate_code(secret: &str, unix_seconds: u64) -> Option<String> {
    build_totp(secret).map(|totp| totp.generate(unix_seconds))
}

/// Accepts codes from the previous, current or next time step. Any decoding problem is a rejection.
pub fn verify_code(secret: &str, code: &str, unix_seconds: u64) -> bool {
    if code.len() != TOTP_DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match build_totp(secret) {
        // totp-rs compares in constant time
        Some(totp) => totp.check(code, unix_seconds),
        None => false,
    }
}

pub fn verify_code_now(secret: &str, code: &str) -> bool {
    verify_code(secret, code, chrono::Utc::now().timestamp().max(0) as u64)
}

/// otpauth:// URI understood by authenticator apps.
pub fn provisioning_uri(account_name: &str, secret: &str, issuer: &str) -> String {
    format!(
        "otpauth://totp/{}:{}?secret={}&issuer={}&algorithm=SHA1&digits={}&period={}",
        urlencoding::encode(issuer),
        urlencoding::encode(account_name),
        secret,
        urlencoding::encode(issuer),
        TOTP_DIGITS,
        TOTP_STEP
    )
}

/// Render a provisioning URI as an SVG QR code data URL
pub fn qr_code_data_url(uri: &str) -> Result<String, AppError> {
    let qr = QrCode::new(uri).map_err(|e| AppError::Internal(format!("Failed to generate QR code: {}", e)))?;
    let qr_svg = qr.render::<qrcode::render::svg::Color>().min_dimensions(200, 200).build();
    let base64_svg = general_purpose::STANDARD.encode(qr_svg.as_bytes());
    Ok(format!("data:image/svg+xml;base64,{}", base64_svg))
}

/// Encrypt a TOTP secret using AES-256-GCM.
/// Returns (encrypted_base64, nonce_base64)
pub fn encrypt_secret(secret: &str, key: &[u8; 32]) -> Result<(String, String), AppError> {
    let cipher = Aes256Gcm::new(key.into());
    let nonce_bytes: [u8; NONCE_BYTES] = rand::random();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("Encryption failed: {}", e)))?;

    Ok((general_purpose::STANDARD.encode(&ciphertext), general_purpose::STANDARD.encode(nonce_bytes)))
}

pub fn decrypt_secret(encrypted_base64: &str, nonce_base64: &str, key: &[u8; 32]) -> Result<String, AppError> {
    let cipher = Aes256Gcm::new(key.into());

    let ciphertext = general_purpose::STANDARD
        .decode(encrypted_base64)
        .map_err(|e| AppError::Internal(format!("Failed to decode encrypted secret: {}", e)))?;
    let nonce_bytes = general_purpose::STANDARD
        .decode(nonce_base64)
        .map_err(|e| AppError::Internal(format!("Failed to decode nonce: {}", e)))?;
    if nonce_bytes.len() != NONCE_BYTES {
        return Err(AppError::Internal(format!("Nonce must be {} bytes, got {}", NONCE_BYTES, nonce_bytes.len())));
    }

    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|e| AppError::Internal(format!("Decryption failed: {}", e)))?;

    String::from_utf8(plaintext).map_err(|e| AppError::Internal(format!("Invalid UTF-8 in decrypted secret: {}", e)))
}
