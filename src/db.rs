use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("edutest.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS levels(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            description TEXT,
            order_index INTEGER NOT NULL,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            level_id TEXT NOT NULL,
            name TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            description TEXT,
            order_index INTEGER NOT NULL,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(level_id) REFERENCES levels(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_level ON grades(level_id, order_index)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            grade_id TEXT NOT NULL,
            name TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            description TEXT,
            order_index INTEGER NOT NULL,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(grade_id) REFERENCES grades(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_grade ON subjects(grade_id, order_index)",
        [],
    )?;

    // Units hang off a grade; the subject is a cross-cutting tag within the
    // same grade, used to derive a question's subject through the chain.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS units(
            id TEXT PRIMARY KEY,
            grade_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            name TEXT NOT NULL,
            display_name TEXT NOT NULL,
            description TEXT,
            order_index INTEGER NOT NULL,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(grade_id) REFERENCES grades(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_units_grade ON units(grade_id, order_index)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_units_subject ON units(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sub_units(
            id TEXT PRIMARY KEY,
            unit_id TEXT NOT NULL,
            name TEXT NOT NULL,
            display_name TEXT NOT NULL,
            description TEXT,
            order_index INTEGER NOT NULL,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(unit_id) REFERENCES units(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sub_units_unit ON sub_units(unit_id, order_index)",
        [],
    )?;

    // sub_unit_id is nullable: unattached concepts form their own sibling
    // group for ordering purposes.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS concepts(
            id TEXT PRIMARY KEY,
            sub_unit_id TEXT,
            name TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            description TEXT,
            order_index INTEGER NOT NULL,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(sub_unit_id) REFERENCES sub_units(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_concepts_sub_unit ON concepts(sub_unit_id, order_index)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            full_name TEXT NOT NULL,
            role TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            id TEXT PRIMARY KEY,
            level_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            sub_unit_id TEXT,
            concept_id TEXT,
            difficulty TEXT NOT NULL,
            eval_domain TEXT,
            question_type TEXT NOT NULL,
            content TEXT NOT NULL,
            correct_answer TEXT,
            points INTEGER NOT NULL DEFAULT 10,
            reference_image TEXT,
            reference_document TEXT,
            created_by TEXT,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(level_id) REFERENCES levels(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(sub_unit_id) REFERENCES sub_units(id),
            FOREIGN KEY(concept_id) REFERENCES concepts(id),
            FOREIGN KEY(created_by) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_level ON questions(level_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_concept ON questions(concept_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS question_options(
            id TEXT PRIMARY KEY,
            question_id TEXT NOT NULL,
            option_text TEXT NOT NULL,
            is_correct INTEGER NOT NULL DEFAULT 0,
            option_order INTEGER NOT NULL,
            FOREIGN KEY(question_id) REFERENCES questions(id),
            UNIQUE(question_id, option_order)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_question_options_question ON question_options(question_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_profiles(
            user_id TEXT PRIMARY KEY,
            level_id TEXT,
            grade_id TEXT,
            subject_id TEXT,
            unit_id TEXT,
            sub_unit_id TEXT,
            proficiency_level TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(level_id) REFERENCES levels(id),
            FOREIGN KEY(grade_id) REFERENCES grades(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(unit_id) REFERENCES units(id),
            FOREIGN KEY(sub_unit_id) REFERENCES sub_units(id)
        )",
        [],
    )?;

    // Append-only attempt ledger. No FK on question_id: attempts are history
    // and must survive question deletion. The hierarchy columns are copied at
    // attempt time so grouped rollups never need joins.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_question_attempts(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            question_id TEXT NOT NULL,
            is_correct INTEGER NOT NULL,
            user_answer TEXT,
            time_spent_seconds INTEGER,
            attempted_at TEXT NOT NULL,
            concept_id TEXT,
            sub_unit_id TEXT,
            unit_id TEXT,
            grade_id TEXT,
            level_id TEXT,
            difficulty TEXT,
            FOREIGN KEY(student_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attempts_student ON student_question_attempts(student_id, attempted_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attempts_question ON student_question_attempts(question_id)",
        [],
    )?;

    // Derived cache over the ledger. OVERALL rows store entity_id = '' so the
    // UNIQUE constraint applies (NULLs never conflict in SQLite).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_stats(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            stats_type TEXT NOT NULL,
            entity_id TEXT NOT NULL DEFAULT '',
            attempt_count INTEGER NOT NULL DEFAULT 0,
            correct_count INTEGER NOT NULL DEFAULT 0,
            correct_rate REAL NOT NULL DEFAULT 0,
            last_updated TEXT,
            FOREIGN KEY(student_id) REFERENCES users(id),
            UNIQUE(student_id, stats_type, entity_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_stats_type ON student_stats(student_id, stats_type)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS auth_sessions(
            token_hash TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_auth_sessions_user ON auth_sessions(user_id)",
        [],
    )?;

    Ok(())
}
