use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "school.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS admins(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS books(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            cover_asset_id TEXT,
            level TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            book_id TEXT,
            teacher TEXT,
            schedule TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            FOREIGN KEY(book_id) REFERENCES books(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_book ON classes(book_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            class_id TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            modality TEXT NOT NULL DEFAULT 'online',
            current_book_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(current_book_id) REFERENCES books(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_email ON students(email)",
        [],
    )?;

    // Contract fields arrived after the first workspaces shipped. Add and
    // leave NULL for students without a contract.
    ensure_students_contract_columns(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS units(
            id TEXT PRIMARY KEY,
            book_id TEXT NOT NULL,
            title TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(book_id) REFERENCES books(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_units_book ON units(book_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            unit_id TEXT NOT NULL,
            title TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(unit_id) REFERENCES units(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_unit ON lessons(unit_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS contents(
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            title TEXT,
            data TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_contents_lesson ON contents(lesson_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            student_name TEXT NOT NULL,
            amount REAL NOT NULL,
            due_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            paid_date TEXT,
            description TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student ON payments(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_due_date ON payments(due_date)",
        [],
    )?;
    ensure_payments_gateway_columns(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_sessions(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            book_id TEXT,
            date TEXT NOT NULL,
            time TEXT,
            lesson TEXT,
            warmer TEXT,
            hw_correction TEXT,
            notes TEXT,
            next_homework TEXT,
            teacher TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(book_id) REFERENCES books(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_sessions_student ON class_sessions(student_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assets(
            id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            byte_len INTEGER NOT NULL,
            sha256 TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_contract_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "students", "contract_start")? {
        conn.execute("ALTER TABLE students ADD COLUMN contract_start TEXT", [])?;
    }
    if !table_has_column(conn, "students", "contract_end")? {
        conn.execute("ALTER TABLE students ADD COLUMN contract_end TEXT", [])?;
    }
    if !table_has_column(conn, "students", "monthly_value")? {
        conn.execute("ALTER TABLE students ADD COLUMN monthly_value REAL", [])?;
    }
    if !table_has_column(conn, "students", "due_day")? {
        conn.execute("ALTER TABLE students ADD COLUMN due_day INTEGER", [])?;
    }
    Ok(())
}

fn ensure_payments_gateway_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "payments", "gateway")? {
        conn.execute(
            "ALTER TABLE payments ADD COLUMN gateway TEXT NOT NULL DEFAULT 'manual'",
            [],
        )?;
    }
    if !table_has_column(conn, "payments", "payment_method")? {
        conn.execute(
            "ALTER TABLE payments ADD COLUMN payment_method TEXT NOT NULL DEFAULT 'manual'",
            [],
        )?;
    }
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
