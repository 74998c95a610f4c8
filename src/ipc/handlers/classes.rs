use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    // Student counts come from a correlated subquery so a join cannot
    // double-count.
    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.branch,
           c.year,
           c.section,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
         FROM classes c
         ORDER BY c.year, c.branch, c.section, c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let branch: String = row.get(2)?;
            let year: i64 = row.get(3)?;
            let section: String = row.get(4)?;
            let student_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "name": name,
                "branch": branch,
                "year": year,
                "section": section,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    let branch = match req.params.get("branch").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_ascii_uppercase(),
        None => return err(&req.id, "bad_params", "missing branch", None),
    };
    let Some(year) = req.params.get("year").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing year", None);
    };
    let section = match req.params.get("section").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing section", None),
    };
    if name.is_empty() || branch.is_empty() || section.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "name/branch/section must not be empty",
            None,
        );
    }
    if year < 1 {
        return err(&req.id, "bad_params", "year must be a positive integer", None);
    }

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, branch, year, section) VALUES(?, ?, ?, ?, ?)",
        (&class_id, &name, &branch, year, &section),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(&req.id, json!({ "classId": class_id, "name": name }))
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(v) = patch.get("name") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.name must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        set_parts.push("name = ?".into());
        bind_values.push(Value::Text(s));
    }
    if let Some(v) = patch.get("branch") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.branch must be a string", None);
        };
        let s = s.trim().to_ascii_uppercase();
        if s.is_empty() {
            return err(&req.id, "bad_params", "branch must not be empty", None);
        }
        set_parts.push("branch = ?".into());
        bind_values.push(Value::Text(s));
    }
    if let Some(v) = patch.get("year") {
        let Some(y) = v.as_i64() else {
            return err(&req.id, "bad_params", "patch.year must be an integer", None);
        };
        if y < 1 {
            return err(&req.id, "bad_params", "year must be a positive integer", None);
        }
        set_parts.push("year = ?".into());
        bind_values.push(Value::Integer(y));
    }
    if let Some(v) = patch.get("section") {
        let Some(s) = v.as_str() else {
            return err(
                &req.id,
                "bad_params",
                "patch.section must be a string",
                None,
            );
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "section must not be empty", None);
        }
        set_parts.push("section = ?".into());
        bind_values.push(Value::Text(s));
    }

    if set_parts.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "patch must include at least one field",
            None,
        );
    }

    let sql = format!("UPDATE classes SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(Value::Text(class_id));

    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "classes" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "class not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let student_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM students WHERE class_id = ?",
        [&class_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_count > 0 {
        return err(
            &req.id,
            "class_not_empty",
            "delete or move the students first",
            Some(json!({ "studentCount": student_count })),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM classes WHERE id = ?", [&class_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
