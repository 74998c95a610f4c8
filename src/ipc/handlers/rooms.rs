use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::seating;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde_json::json;
use uuid::Uuid;

fn room_json(id: String, name: String, capacity: i64) -> serde_json::Value {
    let (rows, cols) = seating::grid_shape(capacity.max(0) as usize);
    json!({
        "id": id,
        "name": name,
        "capacity": capacity,
        "seatRows": rows,
        "seatCols": cols
    })
}

fn handle_rooms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "rooms": [] }));
    };

    let mut stmt = match conn.prepare("SELECT id, name, capacity FROM rooms") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let capacity: i64 = row.get(2)?;
            Ok((id, name, capacity))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(mut rooms) => {
            // Numeric name order, not lexical: R2 before R10.
            rooms.sort_by_key(|(_, name, _)| seating::room_sort_key(name));
            let rooms: Vec<serde_json::Value> = rooms
                .into_iter()
                .map(|(id, name, capacity)| room_json(id, name, capacity))
                .collect();
            ok(&req.id, json!({ "rooms": rooms }))
        }
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_rooms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    let Some(capacity) = req.params.get("capacity").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing capacity", None);
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    if capacity < 1 {
        return err(
            &req.id,
            "bad_params",
            "capacity must be a positive integer",
            None,
        );
    }

    let room_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO rooms(id, name, capacity) VALUES(?, ?, ?)",
        (&room_id, &name, capacity),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "rooms" })),
        );
    }

    ok(&req.id, room_json(room_id, name, capacity))
}

fn handle_rooms_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let room_id = match req.params.get("roomId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing roomId", None),
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
    if let Some(v) = patch.get("capacity") {
        let Some(c) = v.as_i64() else {
            return err(
                &req.id,
                "bad_params",
                "patch.capacity must be an integer",
                None,
            );
        };
        if c < 1 {
            return err(
                &req.id,
                "bad_params",
                "capacity must be a positive integer",
                None,
            );
        }
        set_parts.push("capacity = ?".into());
        bind_values.push(Value::Integer(c));
    }

    if set_parts.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "patch must include at least one field",
            None,
        );
    }

    let sql = format!("UPDATE rooms SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(Value::Text(room_id));

    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "rooms" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "room not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_rooms_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let room_id = match req.params.get("roomId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing roomId", None),
    };

    let changed = match conn.execute("DELETE FROM rooms WHERE id = ?", [&room_id]) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "rooms" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "room not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "rooms.list" => Some(handle_rooms_list(state, req)),
        "rooms.create" => Some(handle_rooms_create(state, req)),
        "rooms.update" => Some(handle_rooms_update(state, req)),
        "rooms.delete" => Some(handle_rooms_delete(state, req)),
        _ => None,
    }
}
