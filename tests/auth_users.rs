mod test_support;

use serde_json::json;
use test_support::{register, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn registration_conflicts_and_login_paths() {
    let workspace = temp_dir("edutest-auth");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let registered = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.register",
        json!({
            "username": "kim",
            "password": "secret-1",
            "email": "kim@example.com",
            "fullName": "김철수",
        }),
    );
    assert_eq!(registered["username"], "kim");
    assert_eq!(registered["fullName"], "김철수");
    assert_eq!(registered["role"], "STUDENT");
    assert!(registered["token"].as_str().is_some());
    assert!(registered["refreshToken"].as_str().is_some());

    // Same username again.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "auth.register",
        json!({
            "username": "kim",
            "password": "other",
            "email": "kim2@example.com",
        }),
    );
    assert_eq!(code, "conflict");

    // Same email under a different username.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "auth.register",
        json!({
            "username": "kim2",
            "password": "other",
            "email": "kim@example.com",
        }),
    );
    assert_eq!(code, "conflict");

    // Login by username, then by email.
    let by_username = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "auth.login",
        json!({ "username": "kim", "password": "secret-1" }),
    );
    assert!(by_username["token"].as_str().is_some());
    let by_email = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "auth.login",
        json!({ "username": "kim@example.com", "password": "secret-1" }),
    );
    assert_eq!(by_email["username"], "kim");

    // Wrong password.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "auth.login",
        json!({ "username": "kim", "password": "wrong" }),
    );
    assert_eq!(code, "auth_failed");

    // Deactivated account fails even with correct credentials.
    let admin = register(&mut stdin, &mut reader, "8", "admin", "ADMIN");
    let kim = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "users.me",
        json!({ "token": by_username["token"] }),
    );
    let kim_id = kim["user"]["id"].as_str().expect("kim id").to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "users.setActive",
        json!({ "token": admin, "userId": kim_id, "active": false }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "12",
        "auth.login",
        json!({ "username": "kim", "password": "secret-1" }),
    );
    assert_eq!(code, "auth_failed");
}

#[test]
fn profile_updates_are_partial_and_password_gated() {
    let workspace = temp_dir("edutest-profile");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let token = register(&mut stdin, &mut reader, "2", "lee", "STUDENT");

    // No token: unauthorized.
    let code = request_err(&mut stdin, &mut reader, "3", "users.me", json!({}));
    assert_eq!(code, "unauthorized");

    // Partial update: only fullName changes.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "users.updateProfile",
        json!({ "token": token, "fullName": "이영희" }),
    );
    assert_eq!(updated["user"]["fullName"], "이영희");
    assert_eq!(updated["user"]["email"], "lee@example.com");

    // Password change needs the current password.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "users.updateProfile",
        json!({ "token": token, "newPassword": "brand-new" }),
    );
    assert_eq!(code, "invalid_argument");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "users.updateProfile",
        json!({ "token": token, "currentPassword": "nope", "newPassword": "brand-new" }),
    );
    assert_eq!(code, "invalid_argument");

    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "users.updateProfile",
        json!({ "token": token, "currentPassword": "pw-123456", "newPassword": "brand-new" }),
    );
    let relogin = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "auth.login",
        json!({ "username": "lee", "password": "brand-new" }),
    );
    assert_eq!(relogin["username"], "lee");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "auth.login",
        json!({ "username": "lee", "password": "pw-123456" }),
    );
    assert_eq!(code, "auth_failed");
}

#[test]
fn register_with_grade_selects_default_placement() {
    let workspace = temp_dir("edutest-placement");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = register(&mut stdin, &mut reader, "2", "teacher", "TEACHER");

    let level = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "levels.create",
        json!({ "token": teacher, "name": "고등학교" }),
    );
    let level_id = level["level"]["id"].as_str().expect("id").to_string();
    let grade = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.create",
        json!({ "token": teacher, "levelId": level_id, "name": "H1" }),
    );
    let grade_id = grade["grade"]["id"].as_str().expect("id").to_string();

    // Two subjects; the placement default must pick the first by order.
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "subjects.create",
        json!({ "token": teacher, "gradeId": grade_id, "name": "물리학" }),
    );
    let subject_id = subject["subject"]["id"].as_str().expect("id").to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "subjects.create",
        json!({ "token": teacher, "gradeId": grade_id, "name": "화학" }),
    );

    let unit = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "units.create",
        json!({ "token": teacher, "gradeId": grade_id, "subjectId": subject_id, "name": "역학" }),
    );
    let unit_id = unit["unit"]["id"].as_str().expect("id").to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "subUnits.create",
        json!({ "token": teacher, "unitId": unit_id, "name": "힘과 운동" }),
    );

    let student = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "auth.register",
        json!({
            "username": "choi",
            "password": "pw-123456",
            "email": "choi@example.com",
            "levelId": level_id,
            "gradeId": grade_id,
        }),
    );
    let me = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "users.me",
        json!({ "token": student["token"] }),
    );
    assert_eq!(me["user"]["levelName"], "고등학교");
    assert_eq!(me["user"]["gradeName"], "H1");
    assert_eq!(me["user"]["subjectName"], "물리학");
    assert_eq!(me["user"]["unitName"], "역학");
    assert_eq!(me["user"]["subUnitName"], "힘과 운동");
}
