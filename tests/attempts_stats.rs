mod test_support;

use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};

use serde_json::json;
use test_support::{register, request_ok, spawn_sidecar, temp_dir};

struct Fixture {
    level_id: String,
    grade_id: String,
    unit_id: String,
    sub_unit_id: String,
    concept_id: String,
    question_id: String,
}

/// Hierarchy plus one MULTIPLE_CHOICE question (correct answer "B").
fn setup(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Fixture {
    let teacher = register(stdin, reader, "s1", "teacher", "TEACHER");

    let level = request_ok(
        stdin,
        reader,
        "s2",
        "levels.create",
        json!({ "token": teacher, "name": "고등학교" }),
    );
    let level_id = level["level"]["id"].as_str().expect("id").to_string();
    let grade = request_ok(
        stdin,
        reader,
        "s3",
        "grades.create",
        json!({ "token": teacher, "levelId": level_id, "name": "H1" }),
    );
    let grade_id = grade["grade"]["id"].as_str().expect("id").to_string();
    let subject = request_ok(
        stdin,
        reader,
        "s4",
        "subjects.create",
        json!({ "token": teacher, "gradeId": grade_id, "name": "화학" }),
    );
    let subject_id = subject["subject"]["id"].as_str().expect("id").to_string();
    let unit = request_ok(
        stdin,
        reader,
        "s5",
        "units.create",
        json!({ "token": teacher, "gradeId": grade_id, "subjectId": subject_id, "name": "화학 결합" }),
    );
    let unit_id = unit["unit"]["id"].as_str().expect("id").to_string();
    let sub_unit = request_ok(
        stdin,
        reader,
        "s6",
        "subUnits.create",
        json!({ "token": teacher, "unitId": unit_id, "name": "이온 결합" }),
    );
    let sub_unit_id = sub_unit["subUnit"]["id"].as_str().expect("id").to_string();
    let concept = request_ok(
        stdin,
        reader,
        "s7",
        "concepts.create",
        json!({ "token": teacher, "subUnitId": sub_unit_id, "name": "이온의 형성" }),
    );
    let concept_id = concept["concept"]["id"].as_str().expect("id").to_string();

    let question = request_ok(
        stdin,
        reader,
        "s8",
        "questions.create",
        json!({
            "token": teacher,
            "levelId": level_id,
            "subUnitId": sub_unit_id,
            "conceptIds": [concept_id],
            "difficulty": "MEDIUM",
            "questionType": "MULTIPLE_CHOICE",
            "questionText": "나트륨 이온의 전하는?",
            "correctAnswer": "B",
            "options": [
                { "optionText": "A", "optionOrder": 0 },
                { "optionText": "B", "optionOrder": 1 },
                { "optionText": "C", "optionOrder": 2 },
            ],
        }),
    );
    let question_id = question["question"]["id"].as_str().expect("id").to_string();

    Fixture {
        level_id,
        grade_id,
        unit_id,
        sub_unit_id,
        concept_id,
        question_id,
    }
}

fn student_stats(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    student_id: &str,
    stats_type: &str,
    entity_id: Option<&str>,
) -> (i64, i64, f64) {
    let mut params = json!({ "studentId": student_id, "statsType": stats_type });
    if let Some(e) = entity_id {
        params["entityId"] = json!(e);
    }
    let result = request_ok(stdin, reader, id, "stats.student", params);
    let stats = &result["stats"];
    (
        stats["attemptCount"].as_i64().expect("attemptCount"),
        stats["correctCount"].as_i64().expect("correctCount"),
        stats["correctRate"].as_f64().expect("correctRate"),
    )
}

#[test]
fn attempts_roll_up_to_every_hierarchy_level() {
    let workspace = temp_dir("edutest-stats");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let fx = setup(&mut stdin, &mut reader);

    let student = register(&mut stdin, &mut reader, "2", "kim", "STUDENT");
    let me = request_ok(&mut stdin, &mut reader, "3", "users.me", json!({ "token": student }));
    let student_id = me["user"]["id"].as_str().expect("student id").to_string();

    // One correct, one wrong.
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attempts.record",
        json!({ "token": student, "questionId": fx.question_id, "userAnswer": "B" }),
    );
    assert_eq!(first["isCorrect"], true);
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attempts.record",
        json!({ "token": student, "questionId": fx.question_id, "userAnswer": "C" }),
    );
    assert_eq!(second["isCorrect"], false);

    // Every rollup level sees both attempts.
    for (i, (stats_type, entity)) in [
        ("CONCEPT", Some(fx.concept_id.as_str())),
        ("SUB_UNIT", Some(fx.sub_unit_id.as_str())),
        ("UNIT", Some(fx.unit_id.as_str())),
        ("GRADE", Some(fx.grade_id.as_str())),
        ("LEVEL", Some(fx.level_id.as_str())),
        ("OVERALL", None),
    ]
    .iter()
    .enumerate()
    {
        let (attempts, correct, rate) = student_stats(
            &mut stdin,
            &mut reader,
            &format!("6-{}", i),
            &student_id,
            stats_type,
            *entity,
        );
        assert_eq!((attempts, correct), (2, 1), "{} counts", stats_type);
        assert_eq!(rate, 50.0, "{} rate", stats_type);
    }

    // An entity with no attempts reads as zero, not as an error.
    let (attempts, correct, rate) = student_stats(
        &mut stdin,
        &mut reader,
        "7",
        &student_id,
        "CONCEPT",
        Some("never-attempted"),
    );
    assert_eq!((attempts, correct, rate), (0, 0, 0.0));

    // Item analysis counts distinct students, not raw attempts.
    let question = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "questions.get",
        json!({ "questionId": fx.question_id }),
    );
    assert_eq!(question["question"]["attemptCount"], 1);
    assert_eq!(question["question"]["correctCount"], 1);
    assert_eq!(question["question"]["correctRate"], 100.0);

    let other = register(&mut stdin, &mut reader, "9", "lee", "STUDENT");
    request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "attempts.record",
        json!({ "token": other, "questionId": fx.question_id, "userAnswer": "A" }),
    );
    let question = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "questions.get",
        json!({ "questionId": fx.question_id }),
    );
    assert_eq!(question["question"]["attemptCount"], 2);
    assert_eq!(question["question"]["correctCount"], 1);
    assert_eq!(question["question"]["correctRate"], 50.0);

    // Recent attempts, newest first.
    let attempts = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "attempts.listByStudent",
        json!({ "studentId": student_id }),
    );
    let rows = attempts["attempts"].as_array().expect("attempts");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["isCorrect"], false);
    assert_eq!(rows[1]["isCorrect"], true);
    assert_eq!(rows[0]["conceptId"].as_str(), Some(fx.concept_id.as_str()));
    assert_eq!(rows[0]["levelId"].as_str(), Some(fx.level_id.as_str()));
}

#[test]
fn rebuild_from_ledger_matches_incremental_cache() {
    let workspace = temp_dir("edutest-rebuild");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let fx = setup(&mut stdin, &mut reader);
    let admin = register(&mut stdin, &mut reader, "2", "admin", "ADMIN");

    let student = register(&mut stdin, &mut reader, "3", "park", "STUDENT");
    let me = request_ok(&mut stdin, &mut reader, "4", "users.me", json!({ "token": student }));
    let student_id = me["user"]["id"].as_str().expect("id").to_string();

    for (i, answer) in ["B", "A", "B", "C", "B"].iter().enumerate() {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("5-{}", i),
            "attempts.record",
            json!({ "token": student, "questionId": fx.question_id, "userAnswer": answer }),
        );
    }

    let before = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "stats.studentAll",
        json!({ "studentId": student_id }),
    );

    // The cache is a materialized view: wiping and regrouping from the
    // ledger must land on exactly the same numbers.
    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "stats.rebuild",
        json!({ "token": admin, "studentId": student_id }),
    );
    let after = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "stats.studentAll",
        json!({ "studentId": student_id }),
    );

    let strip_updated = |v: &serde_json::Value| -> Vec<serde_json::Value> {
        v["stats"]
            .as_array()
            .expect("stats")
            .iter()
            .map(|row| {
                let mut row = row.clone();
                row.as_object_mut().expect("row").remove("lastUpdated");
                row
            })
            .collect()
    };
    assert_eq!(strip_updated(&before), strip_updated(&after));

    let (attempts, correct, rate) = {
        let result = request_ok(
            &mut stdin,
            &mut reader,
            "9",
            "stats.student",
            json!({ "studentId": student_id, "statsType": "OVERALL" }),
        );
        (
            result["stats"]["attemptCount"].as_i64().expect("attempts"),
            result["stats"]["correctCount"].as_i64().expect("correct"),
            result["stats"]["correctRate"].as_f64().expect("rate"),
        )
    };
    assert_eq!((attempts, correct), (5, 3));
    assert_eq!(rate, 60.0);
}
