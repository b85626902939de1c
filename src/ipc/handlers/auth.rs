use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::auth::{self, KIND_ACCESS, KIND_REFRESH, ROLE_ADMIN, ROLE_STUDENT, ROLE_TEACHER};
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::error::{ok, service_err};
use crate::ipc::helpers::{db_conn, optional_str, required_str, row_exists};
use crate::ipc::types::{AppState, Request};

struct UserRow {
    id: String,
    username: String,
    email: String,
    password_hash: String,
    full_name: String,
    role: String,
    active: bool,
}

fn find_user(
    conn: &Connection,
    column: &str,
    value: &str,
) -> ServiceResult<Option<UserRow>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT id, username, email, password_hash, full_name, role, active
                 FROM users WHERE {} = ?",
                column
            ),
            [value],
            |r| {
                Ok(UserRow {
                    id: r.get(0)?,
                    username: r.get(1)?,
                    email: r.get(2)?,
                    password_hash: r.get(3)?,
                    full_name: r.get(4)?,
                    role: r.get(5)?,
                    active: r.get::<_, i64>(6)? != 0,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn auth_response(conn: &Connection, user: &UserRow) -> ServiceResult<serde_json::Value> {
    let token = auth::create_session(conn, &user.id, KIND_ACCESS)?;
    let refresh_token = auth::create_session(conn, &user.id, KIND_REFRESH)?;
    Ok(json!({
        "token": token,
        "refreshToken": refresh_token,
        "username": user.username,
        "email": user.email,
        "fullName": user.full_name,
        "role": user.role,
    }))
}

/// First subject/unit/sub-unit of the grade (by order_index) as the new
/// student's default placement. A convenience default only.
fn default_placement(
    conn: &Connection,
    grade_id: &str,
) -> ServiceResult<(Option<String>, Option<String>, Option<String>)> {
    let subject: Option<String> = conn
        .query_row(
            "SELECT id FROM subjects WHERE grade_id = ? ORDER BY order_index, id LIMIT 1",
            [grade_id],
            |r| r.get(0),
        )
        .optional()?;
    let unit: Option<String> = conn
        .query_row(
            "SELECT id FROM units WHERE grade_id = ? ORDER BY order_index, id LIMIT 1",
            [grade_id],
            |r| r.get(0),
        )
        .optional()?;
    let sub_unit: Option<String> = match &unit {
        Some(u) => conn
            .query_row(
                "SELECT id FROM sub_units WHERE unit_id = ? ORDER BY order_index, id LIMIT 1",
                [u],
                |r| r.get(0),
            )
            .optional()?,
        None => None,
    };
    Ok((subject, unit, sub_unit))
}

fn auth_register(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;

    let username = required_str(req, "username")?;
    let password = required_str(req, "password")?;
    let email = required_str(req, "email")?;

    if find_user(conn, "username", &username)?.is_some() {
        return Err(ServiceError::Conflict("Username already exists".into()));
    }
    if find_user(conn, "email", &email)?.is_some() {
        return Err(ServiceError::Conflict("Email already exists".into()));
    }

    let full_name = optional_str(req, "fullName")?.unwrap_or_else(|| username.clone());
    let role = optional_str(req, "role")?.unwrap_or_else(|| ROLE_STUDENT.to_string());
    if ![ROLE_STUDENT, ROLE_TEACHER, ROLE_ADMIN].contains(&role.as_str()) {
        return Err(ServiceError::BadParams(format!("unknown role: {}", role)));
    }

    let level_id = optional_str(req, "levelId")?;
    if let Some(l) = &level_id {
        if !row_exists(conn, "levels", l)? {
            return Err(ServiceError::not_found("Level", l));
        }
    }
    let grade_id = optional_str(req, "gradeId")?;
    let (subject_id, unit_id, sub_unit_id) = match &grade_id {
        Some(g) => {
            if !row_exists(conn, "grades", g)? {
                return Err(ServiceError::not_found("Grade", g));
            }
            default_placement(conn, g)?
        }
        None => (None, None, None),
    };
    let proficiency_level = optional_str(req, "proficiencyLevel")?;

    let password_hash = auth::hash_password(&password)?;
    let user_id = Uuid::new_v4().to_string();

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO users(id, username, email, password_hash, full_name, role, active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, 1, strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&user_id, &username, &email, &password_hash, &full_name, &role),
    )?;
    tx.execute(
        "INSERT INTO student_profiles(user_id, level_id, grade_id, subject_id, unit_id, sub_unit_id, proficiency_level)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &user_id,
            level_id.as_deref(),
            grade_id.as_deref(),
            subject_id.as_deref(),
            unit_id.as_deref(),
            sub_unit_id.as_deref(),
            proficiency_level.as_deref(),
        ),
    )?;
    tx.commit()?;

    let user = find_user(conn, "id", &user_id)?
        .ok_or_else(|| ServiceError::Internal("user vanished after insert".into()))?;
    auth_response(conn, &user)
}

fn auth_login(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;

    let username_or_email = required_str(req, "username")?;
    let password = required_str(req, "password")?;

    // Username first, then email. Every failure path below returns the same
    // message.
    let user = match find_user(conn, "username", &username_or_email)? {
        Some(u) => Some(u),
        None => find_user(conn, "email", &username_or_email)?,
    };
    let Some(user) = user else {
        return Err(ServiceError::AuthFailed);
    };
    if !auth::verify_password(&password, &user.password_hash) {
        return Err(ServiceError::AuthFailed);
    }
    if !user.active {
        return Err(ServiceError::AuthFailed);
    }

    auth_response(conn, &user)
}

/// Exchange a live refresh token for a fresh access token.
fn auth_refresh(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let refresh_token = required_str(req, "refreshToken")?;

    let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let user_id: Option<String> = conn
        .query_row(
            "SELECT s.user_id
             FROM auth_sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token_hash = ? AND s.kind = ? AND s.expires_at > ? AND u.active = 1",
            (auth::token_digest(&refresh_token), KIND_REFRESH, now),
            |r| r.get(0),
        )
        .optional()?;
    let Some(user_id) = user_id else {
        return Err(ServiceError::Unauthorized("invalid or expired token".into()));
    };

    let token = auth::create_session(conn, &user_id, KIND_ACCESS)?;
    Ok(json!({ "token": token }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "auth.register" => auth_register(state, req),
        "auth.login" => auth_login(state, req),
        "auth.refresh" => auth_refresh(state, req),
        _ => return None,
    };
    Some(match resp {
        Ok(v) => ok(&req.id, v),
        Err(e) => service_err(&req.id, &e),
    })
}
