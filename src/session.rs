use rusqlite::{Connection, OptionalExtension};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Student => "student",
        }
    }
}

/// Active login, held in `AppState` between `auth.login` and `auth.logout`.
/// An admin who also has a student profile keeps the admin role and carries
/// the student id so the player can still serve their own material.
#[derive(Debug, Clone)]
pub struct Session {
    pub profile_id: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub student_profile_id: Option<String>,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

fn find_student(conn: &Connection, email: &str) -> anyhow::Result<Option<(String, String)>> {
    Ok(conn
        .query_row(
            "SELECT id, name FROM students WHERE email = ?",
            [email],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )
        .optional()?)
}

/// Role derivation: an admins row wins over a students row; an email that
/// matches neither yields no session at all.
pub fn resolve_session(conn: &Connection, email: &str) -> anyhow::Result<Option<Session>> {
    let email = email.trim();
    if email.is_empty() {
        return Ok(None);
    }

    let admin: Option<(String, String)> = conn
        .query_row(
            "SELECT id, name FROM admins WHERE email = ?",
            [email],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )
        .optional()?;

    if let Some((admin_id, admin_name)) = admin {
        let student_profile_id = find_student(conn, email)?.map(|(id, _)| id);
        return Ok(Some(Session {
            profile_id: admin_id,
            email: email.to_string(),
            display_name: admin_name,
            role: Role::Admin,
            student_profile_id,
        }));
    }

    if let Some((student_id, student_name)) = find_student(conn, email)? {
        return Ok(Some(Session {
            profile_id: student_id.clone(),
            email: email.to_string(),
            display_name: student_name,
            role: Role::Student,
            student_profile_id: Some(student_id),
        }));
    }

    Ok(None)
}
