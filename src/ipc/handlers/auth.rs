use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use crate::session;
use serde_json::json;
use uuid::Uuid;

fn session_json(s: &session::Session) -> serde_json::Value {
    json!({
        "profileId": s.profile_id,
        "email": s.email,
        "displayName": s.display_name,
        "role": s.role.as_str(),
        "studentProfileId": s.student_profile_id,
    })
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let email = match req.params.get("email").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing email", None),
    };

    match session::resolve_session(conn, &email) {
        Ok(Some(s)) => {
            tracing::info!(email = %s.email, role = s.role.as_str(), "login");
            let result = session_json(&s);
            state.session = Some(s);
            ok(&req.id, result)
        }
        // No matching profile means no access at all; there is no implicit
        // admin fallback for unrecognized emails.
        Ok(None) => err(
            &req.id,
            "unknown_profile",
            format!("no admin or student profile for {}", email),
            None,
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let had_session = state.session.take().is_some();
    ok(&req.id, json!({ "loggedOut": had_session }))
}

fn handle_session(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.session.as_ref() {
        Some(s) => ok(&req.id, json!({ "session": session_json(s) })),
        None => ok(&req.id, json!({ "session": serde_json::Value::Null })),
    }
}

fn handle_admins_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = helpers::require_admin(state, &req.id) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare("SELECT id, name, email, created_at FROM admins ORDER BY name")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "email": row.get::<_, String>(2)?,
                "createdAt": row.get::<_, String>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(admins) => ok(&req.id, json!({ "admins": admins })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_admins_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let admin_count: i64 = match conn.query_row("SELECT COUNT(*) FROM admins", [], |r| r.get(0)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    // First admin bootstraps an empty workspace; after that only admins may
    // add more.
    if admin_count > 0 {
        if let Err(resp) = helpers::require_admin(state, &req.id) {
            return resp;
        }
    }

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let email = match req.params.get("email").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing email", None),
    };

    let admin_id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO admins(id, name, email, created_at) VALUES(?, ?, ?, ?)",
        (&admin_id, &name, &email, &created_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "admins" })),
        );
    }

    ok(&req.id, json!({ "adminId": admin_id, "name": name, "email": email }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.session" => Some(handle_session(state, req)),
        "admins.list" => Some(handle_admins_list(state, req)),
        "admins.create" => Some(handle_admins_create(state, req)),
        _ => None,
    }
}
