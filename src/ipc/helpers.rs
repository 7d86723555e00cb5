use super::error::err;
use super::types::AppState;

/// Admin-console methods call this first; the Err variant is the finished
/// error response.
pub fn require_admin(state: &AppState, id: &str) -> Result<(), serde_json::Value> {
    match state.session.as_ref() {
        None => Err(err(id, "no_session", "login first", None)),
        Some(s) if !s.is_admin() => Err(err(id, "forbidden", "admin role required", None)),
        Some(_) => Ok(()),
    }
}

/// Player methods accept any authenticated role.
pub fn require_session(state: &AppState, id: &str) -> Result<(), serde_json::Value> {
    if state.session.is_some() {
        Ok(())
    } else {
        Err(err(id, "no_session", "login first", None))
    }
}
