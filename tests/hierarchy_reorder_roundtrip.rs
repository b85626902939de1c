mod test_support;

use serde_json::json;
use test_support::{register, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn korean_hierarchy_end_to_end_with_concept_reorder() {
    let workspace = temp_dir("edutest-hierarchy");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let token = register(&mut stdin, &mut reader, "2", "admin", "ADMIN");

    let level = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "levels.create",
        json!({ "token": token, "name": "고등학교", "orderIndex": 1 }),
    );
    let level_id = level["level"]["id"].as_str().expect("levelId").to_string();

    let grade = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.create",
        json!({ "token": token, "levelId": level_id, "name": "H1" }),
    );
    let grade_id = grade["grade"]["id"].as_str().expect("gradeId").to_string();

    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "subjects.create",
        json!({ "token": token, "gradeId": grade_id, "name": "통합과학" }),
    );
    let subject_id = subject["subject"]["id"]
        .as_str()
        .expect("subjectId")
        .to_string();

    let unit = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "units.create",
        json!({
            "token": token,
            "gradeId": grade_id,
            "subjectId": subject_id,
            "name": "물질과 규칙성",
        }),
    );
    let unit_id = unit["unit"]["id"].as_str().expect("unitId").to_string();
    assert_eq!(unit["unit"]["gradeName"], "H1");
    assert_eq!(unit["unit"]["subjectName"], "통합과학");

    let sub_unit = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "subUnits.create",
        json!({ "token": token, "unitId": unit_id, "name": "우주의 시작과 진화" }),
    );
    let sub_unit_id = sub_unit["subUnit"]["id"]
        .as_str()
        .expect("subUnitId")
        .to_string();

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "concepts.create",
        json!({
            "token": token,
            "subUnitId": sub_unit_id,
            "name": "빅뱅 이론",
            "orderIndex": 0,
        }),
    );
    let first_id = first["concept"]["id"].as_str().expect("conceptId").to_string();
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "concepts.create",
        json!({
            "token": token,
            "subUnitId": sub_unit_id,
            "name": "원소의 생성",
            "orderIndex": 1,
        }),
    );
    let second_id = second["concept"]["id"].as_str().expect("conceptId").to_string();

    let reordered = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "concepts.reorder",
        json!({ "token": token, "conceptId": second_id, "direction": "up" }),
    );
    assert_eq!(reordered["applied"], true);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "concepts.listBySubUnit",
        json!({ "subUnitId": sub_unit_id }),
    );
    let names: Vec<&str> = listed["concepts"]
        .as_array()
        .expect("concepts")
        .iter()
        .map(|c| c["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, vec!["원소의 생성", "빅뱅 이론"]);

    // The swap exchanges the two order indexes and touches nothing else.
    let order_indexes: Vec<i64> = listed["concepts"]
        .as_array()
        .expect("concepts")
        .iter()
        .map(|c| c["orderIndex"].as_i64().expect("orderIndex"))
        .collect();
    assert_eq!(order_indexes, vec![0, 1]);

    // Moving the first item up and the last item down are silent no-ops.
    let noop_up = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "concepts.reorder",
        json!({ "token": token, "conceptId": second_id, "direction": "up" }),
    );
    assert_eq!(noop_up["applied"], false);
    let noop_down = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "concepts.reorder",
        json!({ "token": token, "conceptId": first_id, "direction": "down" }),
    );
    assert_eq!(noop_down["applied"], false);

    let unchanged = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "concepts.listBySubUnit",
        json!({ "subUnitId": sub_unit_id }),
    );
    let names_after: Vec<&str> = unchanged["concepts"]
        .as_array()
        .expect("concepts")
        .iter()
        .map(|c| c["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names_after, vec!["원소의 생성", "빅뱅 이론"]);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "15",
        "concepts.reorder",
        json!({ "token": token, "conceptId": "no-such-concept", "direction": "up" }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn grade_reorder_swaps_within_level_only() {
    let workspace = temp_dir("edutest-grade-reorder");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let token = register(&mut stdin, &mut reader, "2", "teacher", "TEACHER");

    let level_a = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "levels.create",
        json!({ "token": token, "name": "중학교" }),
    );
    let level_a_id = level_a["level"]["id"].as_str().expect("id").to_string();
    let level_b = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "levels.create",
        json!({ "token": token, "name": "고등학교" }),
    );
    let level_b_id = level_b["level"]["id"].as_str().expect("id").to_string();

    for (id, level_id, name) in [
        ("5", &level_a_id, "M1"),
        ("6", &level_a_id, "M2"),
        ("7", &level_b_id, "H1"),
    ] {
        request_ok(
            &mut stdin,
            &mut reader,
            id,
            "grades.create",
            json!({ "token": token, "levelId": level_id, "name": name }),
        );
    }

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "grades.listByLevel",
        json!({ "levelId": level_a_id }),
    );
    let m2_id = listed["grades"]
        .as_array()
        .expect("grades")
        .iter()
        .find(|g| g["name"] == "M2")
        .and_then(|g| g["id"].as_str())
        .expect("M2 id")
        .to_string();

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "grades.reorder",
        json!({ "token": token, "gradeId": m2_id, "direction": "up" }),
    );
    assert_eq!(applied["applied"], true);

    let after_a = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "grades.listByLevel",
        json!({ "levelId": level_a_id }),
    );
    let names: Vec<&str> = after_a["grades"]
        .as_array()
        .expect("grades")
        .iter()
        .map(|g| g["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, vec!["M2", "M1"]);

    // The other level's sibling group is untouched.
    let after_b = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "grades.listByLevel",
        json!({ "levelId": level_b_id }),
    );
    assert_eq!(after_b["grades"].as_array().expect("grades").len(), 1);
    assert_eq!(after_b["grades"][0]["name"], "H1");
}

#[test]
fn name_uniqueness_and_child_protection() {
    let workspace = temp_dir("edutest-uniqueness");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let token = register(&mut stdin, &mut reader, "2", "admin", "ADMIN");

    let level = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "levels.create",
        json!({ "token": token, "name": "고등학교" }),
    );
    let level_id = level["level"]["id"].as_str().expect("id").to_string();

    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "levels.create",
        json!({ "token": token, "name": "고등학교" }),
    );
    assert_eq!(code, "conflict");

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.create",
        json!({ "token": token, "levelId": level_id, "name": "H1" }),
    );

    // Grade names are globally unique, even under a different level.
    let other = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "levels.create",
        json!({ "token": token, "name": "중학교" }),
    );
    let other_id = other["level"]["id"].as_str().expect("id").to_string();
    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "grades.create",
        json!({ "token": token, "levelId": other_id, "name": "H1" }),
    );
    assert_eq!(code, "conflict");

    // A level with grades under it cannot be deleted.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "levels.delete",
        json!({ "token": token, "levelId": level_id }),
    );
    assert_eq!(code, "conflict");

    // The empty one can.
    request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "levels.delete",
        json!({ "token": token, "levelId": other_id }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "levels.get",
        json!({ "levelId": other_id }),
    );
    assert_eq!(code, "not_found");

    // Parent resolution failures surface before any write.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "11",
        "grades.create",
        json!({ "token": token, "levelId": "no-such-level", "name": "H9" }),
    );
    assert_eq!(code, "not_found");
}
