use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::auth;
use crate::error::{ServiceError, ServiceResult};
use crate::ipc::error::{ok, service_err};
use crate::ipc::helpers::{db_conn, optional_str, required_bool, required_str, row_exists};
use crate::ipc::types::{AppState, Request};

fn user_response(conn: &Connection, user_id: &str) -> ServiceResult<serde_json::Value> {
    conn.query_row(
        "SELECT u.id, u.username, u.email, u.full_name, u.role,
                p.level_id, l.name,
                p.grade_id, g.name,
                p.subject_id, s.display_name,
                p.unit_id, un.display_name,
                p.sub_unit_id, su.display_name,
                p.proficiency_level
         FROM users u
         LEFT JOIN student_profiles p ON p.user_id = u.id
         LEFT JOIN levels l ON l.id = p.level_id
         LEFT JOIN grades g ON g.id = p.grade_id
         LEFT JOIN subjects s ON s.id = p.subject_id
         LEFT JOIN units un ON un.id = p.unit_id
         LEFT JOIN sub_units su ON su.id = p.sub_unit_id
         WHERE u.id = ?",
        [user_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "username": r.get::<_, String>(1)?,
                "email": r.get::<_, String>(2)?,
                "fullName": r.get::<_, String>(3)?,
                "role": r.get::<_, String>(4)?,
                "levelId": r.get::<_, Option<String>>(5)?,
                "levelName": r.get::<_, Option<String>>(6)?,
                "gradeId": r.get::<_, Option<String>>(7)?,
                "gradeName": r.get::<_, Option<String>>(8)?,
                "subjectId": r.get::<_, Option<String>>(9)?,
                "subjectName": r.get::<_, Option<String>>(10)?,
                "unitId": r.get::<_, Option<String>>(11)?,
                "unitName": r.get::<_, Option<String>>(12)?,
                "subUnitId": r.get::<_, Option<String>>(13)?,
                "subUnitName": r.get::<_, Option<String>>(14)?,
                "proficiencyLevel": r.get::<_, Option<String>>(15)?,
            }))
        },
    )
    .optional()?
    .ok_or_else(|| ServiceError::not_found("User", user_id))
}

fn users_me(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let user = auth::authenticate(conn, req)?;
    Ok(json!({ "user": user_response(conn, &user.id)? }))
}

/// Partial update: only provided fields change. Every field is validated
/// before the first write; a password change must prove knowledge of the
/// current password first.
fn users_update_profile(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    let user = auth::authenticate(conn, req)?;

    let full_name = optional_str(req, "fullName")?;

    let email = optional_str(req, "email")?;
    if let Some(email) = &email {
        let taken_by: Option<String> = conn
            .query_row("SELECT id FROM users WHERE email = ?", [email], |r| {
                r.get(0)
            })
            .optional()?;
        if let Some(other) = taken_by {
            if other != user.id {
                return Err(ServiceError::Conflict("Email already exists".into()));
            }
        }
    }

    let mut placements: Vec<(&str, String)> = Vec::new();
    for (param, table, column) in [
        ("levelId", "levels", "level_id"),
        ("gradeId", "grades", "grade_id"),
        ("subjectId", "subjects", "subject_id"),
        ("unitId", "units", "unit_id"),
        ("subUnitId", "sub_units", "sub_unit_id"),
    ] {
        if let Some(id) = optional_str(req, param)? {
            if !row_exists(conn, table, &id)? {
                return Err(ServiceError::NotFound(format!(
                    "invalid {}: {}",
                    param, id
                )));
            }
            placements.push((column, id));
        }
    }

    let proficiency = optional_str(req, "proficiencyLevel")?;

    let new_password_hash = match optional_str(req, "newPassword")? {
        Some(new_password) => {
            let current = optional_str(req, "currentPassword")?.ok_or_else(|| {
                ServiceError::InvalidArgument("current password is required".into())
            })?;
            let stored_hash: String = conn.query_row(
                "SELECT password_hash FROM users WHERE id = ?",
                [&user.id],
                |r| r.get(0),
            )?;
            if !auth::verify_password(&current, &stored_hash) {
                return Err(ServiceError::InvalidArgument(
                    "current password is incorrect".into(),
                ));
            }
            Some(auth::hash_password(&new_password)?)
        }
        None => None,
    };

    let tx = conn.unchecked_transaction()?;
    if let Some(full_name) = &full_name {
        tx.execute(
            "UPDATE users SET full_name = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?",
            (full_name, &user.id),
        )?;
    }
    if let Some(email) = &email {
        tx.execute(
            "UPDATE users SET email = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?",
            (email, &user.id),
        )?;
    }
    for (column, id) in &placements {
        tx.execute(
            &format!("UPDATE student_profiles SET {} = ? WHERE user_id = ?", column),
            (id, &user.id),
        )?;
    }
    if let Some(proficiency) = &proficiency {
        tx.execute(
            "UPDATE student_profiles SET proficiency_level = ? WHERE user_id = ?",
            (proficiency, &user.id),
        )?;
    }
    if let Some(hash) = &new_password_hash {
        tx.execute(
            "UPDATE users SET password_hash = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?",
            (hash, &user.id),
        )?;
    }
    tx.commit()?;

    Ok(json!({ "user": user_response(conn, &user.id)? }))
}

/// Admin switch for the account's active flag. Deactivated accounts cannot
/// log in even with correct credentials.
fn users_set_active(state: &AppState, req: &Request) -> ServiceResult<serde_json::Value> {
    let conn = db_conn(state)?;
    auth::require_role(conn, req, &[crate::auth::ROLE_ADMIN])?;

    let user_id = required_str(req, "userId")?;
    if !row_exists(conn, "users", &user_id)? {
        return Err(ServiceError::not_found("User", &user_id));
    }
    let active = required_bool(req, "active")?;
    conn.execute(
        "UPDATE users SET active = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?",
        (active as i64, &user_id),
    )?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "users.me" => users_me(state, req),
        "users.updateProfile" => users_update_profile(state, req),
        "users.setActive" => users_set_active(state, req),
        _ => return None,
    };
    Some(match resp {
        Ok(v) => ok(&req.id, v),
        Err(e) => service_err(&req.id, &e),
    })
}
