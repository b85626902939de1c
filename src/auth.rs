//! Password hashing and session tokens.
//!
//! Tokens are opaque 32-byte random hex strings handed to the client once and
//! stored only as SHA-256 digests; access tokens live 1 hour, refresh tokens
//! 30 days.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use rand::RngCore;
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::error::{ServiceError, ServiceResult};
use crate::ipc::Request;

pub const KIND_ACCESS: &str = "access";
pub const KIND_REFRESH: &str = "refresh";

pub const ROLE_STUDENT: &str = "STUDENT";
pub const ROLE_TEACHER: &str = "TEACHER";
pub const ROLE_ADMIN: &str = "ADMIN";

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub username: String,
    pub role: String,
}

pub fn hash_password(password: &str) -> ServiceResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ServiceError::Internal(format!("password hashing failed: {}", e)))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn token_digest(token: &str) -> String {
    hex(&Sha256::digest(token.as_bytes()))
}

fn mint_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex(&bytes)
}

fn ttl_for(kind: &str) -> Duration {
    match kind {
        KIND_REFRESH => Duration::days(30),
        _ => Duration::hours(1),
    }
}

/// Create a session row and return the raw token (stored hashed).
pub fn create_session(conn: &Connection, user_id: &str, kind: &str) -> ServiceResult<String> {
    let token = mint_token();
    let now = Utc::now();
    let expires = now + ttl_for(kind);
    conn.execute(
        "INSERT INTO auth_sessions(token_hash, user_id, kind, created_at, expires_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            token_digest(&token),
            user_id,
            kind,
            now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            expires.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        ),
    )?;
    Ok(token)
}

/// Resolve `params.token` to an active user with a live access session.
pub fn authenticate(conn: &Connection, req: &Request) -> ServiceResult<AuthUser> {
    let token = req
        .params
        .get("token")
        .and_then(|v| v.as_str())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ServiceError::Unauthorized("authentication required".into()))?;

    let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let user: Option<AuthUser> = conn
        .query_row(
            "SELECT u.id, u.username, u.role
             FROM auth_sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.token_hash = ? AND s.kind = ? AND s.expires_at > ? AND u.active = 1",
            (token_digest(token), KIND_ACCESS, now),
            |r| {
                Ok(AuthUser {
                    id: r.get(0)?,
                    username: r.get(1)?,
                    role: r.get(2)?,
                })
            },
        )
        .optional()?;

    user.ok_or_else(|| ServiceError::Unauthorized("invalid or expired token".into()))
}

pub fn require_role(
    conn: &Connection,
    req: &Request,
    roles: &[&str],
) -> ServiceResult<AuthUser> {
    let user = authenticate(conn, req)?;
    if roles.iter().any(|r| *r == user.role) {
        Ok(user)
    } else {
        Err(ServiceError::Forbidden(format!(
            "requires role {}",
            roles.join(" or ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_roundtrip() {
        let hash = hash_password("correct horse").expect("hash");
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn tokens_are_unique_hex() {
        let a = mint_token();
        let b = mint_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
