use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "hpc.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            start_date TEXT,
            end_date TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            grade TEXT NOT NULL,
            section TEXT NOT NULL,
            admission_number TEXT,
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_grade_section ON students(grade, section)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            role TEXT NOT NULL,
            class_teacher_of TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_staff_role ON staff(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS hpc_parameters(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            sub_category TEXT,
            weightage REAL NOT NULL,
            description TEXT,
            grade_applicability TEXT NOT NULL DEFAULT '[]',
            evaluation_frequency TEXT NOT NULL DEFAULT 'periodic',
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS hpc_rubrics(
            id TEXT PRIMARY KEY,
            parameter_id TEXT NOT NULL,
            level TEXT NOT NULL,
            descriptor TEXT NOT NULL,
            detailed_description TEXT,
            examples TEXT NOT NULL DEFAULT '[]',
            indicators TEXT NOT NULL DEFAULT '[]',
            version INTEGER NOT NULL DEFAULT 1,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(parameter_id) REFERENCES hpc_parameters(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rubrics_parameter ON hpc_rubrics(parameter_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS hpc_parameter_assignments(
            id TEXT PRIMARY KEY,
            parameter_id TEXT NOT NULL,
            evaluator_role TEXT NOT NULL,
            weightage REAL NOT NULL,
            required INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(parameter_id) REFERENCES hpc_parameters(id),
            UNIQUE(parameter_id, evaluator_role)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_parameter ON hpc_parameter_assignments(parameter_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS hpc_evaluations(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            parameter_id TEXT NOT NULL,
            evaluator_id TEXT NOT NULL,
            evaluator_role TEXT NOT NULL,
            term_id TEXT NOT NULL,
            score REAL NOT NULL,
            grade TEXT NOT NULL,
            qualitative_remark TEXT,
            evidence_notes TEXT,
            confidence_level REAL NOT NULL,
            evaluation_date TEXT NOT NULL,
            status TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(parameter_id) REFERENCES hpc_parameters(id),
            FOREIGN KEY(term_id) REFERENCES terms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_student_term ON hpc_evaluations(student_id, term_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_parameter ON hpc_evaluations(parameter_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS hpc_achievements(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            title TEXT NOT NULL,
            category TEXT,
            date_achieved TEXT,
            points_awarded REAL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_achievements_student ON hpc_achievements(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS hpc_reflections(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            reflection_type TEXT,
            content TEXT,
            goals TEXT NOT NULL DEFAULT '[]',
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(term_id) REFERENCES terms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reflections_student_term ON hpc_reflections(student_id, term_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS hpc_reports(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            overall_score REAL NOT NULL,
            overall_grade TEXT NOT NULL,
            summary_json TEXT NOT NULL,
            status TEXT NOT NULL,
            compiled_at TEXT NOT NULL,
            compiled_by TEXT NOT NULL,
            approved_at TEXT,
            approved_by TEXT,
            published_at TEXT,
            version INTEGER NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            UNIQUE(student_id, term_id, version)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reports_student ON hpc_reports(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reports_term ON hpc_reports(term_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS hpc_approval_steps(
            id TEXT PRIMARY KEY,
            report_id TEXT NOT NULL,
            step_number INTEGER NOT NULL,
            approver_role TEXT NOT NULL,
            approver_id TEXT NOT NULL,
            due_date TEXT NOT NULL,
            status TEXT NOT NULL,
            assigned_at TEXT,
            approved_at TEXT,
            comments TEXT,
            superseded INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(report_id) REFERENCES hpc_reports(id)
        )",
        [],
    )?;
    // Older workspaces predate explicit workflow re-initiation. Add and backfill.
    ensure_approval_steps_superseded(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_approval_steps_report ON hpc_approval_steps(report_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS hpc_analytics(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            report_id TEXT NOT NULL UNIQUE,
            class_percentile INTEGER NOT NULL,
            grade_percentile INTEGER NOT NULL,
            school_percentile INTEGER NOT NULL,
            growth_trend TEXT NOT NULL,
            predicted_next_score REAL NOT NULL,
            confidence_lower REAL NOT NULL,
            confidence_upper REAL NOT NULL,
            strengths TEXT NOT NULL DEFAULT '[]',
            improvement_areas TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            FOREIGN KEY(report_id) REFERENCES hpc_reports(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_analytics_student ON hpc_analytics(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS hpc_notifications(
            id TEXT PRIMARY KEY,
            report_id TEXT NOT NULL,
            recipient_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            created_at TEXT NOT NULL,
            delivered INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(report_id) REFERENCES hpc_reports(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_report ON hpc_notifications(report_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_approval_steps_superseded(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "hpc_approval_steps", "superseded")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE hpc_approval_steps ADD COLUMN superseded INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    // Steps left behind by a rejection on a pre-migration workspace stay live;
    // the next workflow.initiate supersedes them explicitly.
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
