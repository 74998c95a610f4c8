use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::seating::{self, Candidate, RoomSpec, Seat};
use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const REFERENCE_BRANCH_KEY: &str = "seating.referenceBranch";
const DEFAULT_REFERENCE_BRANCH: &str = "CSE";

fn sql_placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn string_array_param(params: &serde_json::Value, key: &str) -> Result<Vec<String>, String> {
    let Some(arr) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(format!("missing/invalid {}", key));
    };
    let mut out: Vec<String> = Vec::with_capacity(arr.len());
    for v in arr {
        let Some(s) = v.as_str() else {
            return Err(format!("{} must be strings", key));
        };
        out.push(s.to_string());
    }
    Ok(out)
}

fn reference_branch(conn: &Connection) -> String {
    db::settings_get_json(conn, REFERENCE_BRANCH_KEY)
        .ok()
        .flatten()
        .and_then(|v| v.get("branch").and_then(|b| b.as_str()).map(String::from))
        .unwrap_or_else(|| DEFAULT_REFERENCE_BRANCH.to_string())
}

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    ok(
        &req.id,
        json!({ "referenceBranch": reference_branch(conn) }),
    )
}

fn handle_config_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let branch = match req.params.get("referenceBranch").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_ascii_uppercase(),
        None => return err(&req.id, "bad_params", "missing referenceBranch", None),
    };
    if branch.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "referenceBranch must not be empty",
            None,
        );
    }

    if let Err(e) = db::settings_set_json(conn, REFERENCE_BRANCH_KEY, &json!({ "branch": branch }))
    {
        return err(&req.id, "db_update_failed", format!("{e:?}"), None);
    }
    ok(&req.id, json!({ "referenceBranch": branch }))
}

fn load_candidates(
    conn: &Connection,
    class_ids: &[String],
    reference: &str,
) -> Result<Vec<Candidate>, rusqlite::Error> {
    let sql = format!(
        "SELECT s.id, s.last_name, s.first_name, s.register_no, c.branch, c.year, c.section
         FROM students s
         JOIN classes c ON c.id = s.class_id
         WHERE s.active = 1 AND s.class_id IN ({})",
        sql_placeholders(class_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params_from_iter(class_ids.iter().map(|s| Value::Text(s.clone()))),
        |row| {
            let student_id: String = row.get(0)?;
            let last_name: String = row.get(1)?;
            let first_name: String = row.get(2)?;
            let register_no: String = row.get(3)?;
            let branch: String = row.get(4)?;
            let year: i64 = row.get(5)?;
            let section: String = row.get(6)?;
            Ok(Candidate {
                student_id,
                register_no,
                name: format!("{}, {}", last_name, first_name),
                reference: branch == reference,
                branch,
                section,
                year,
            })
        },
    )?;
    rows.collect()
}

fn load_rooms(conn: &Connection, room_ids: &[String]) -> Result<Vec<RoomSpec>, rusqlite::Error> {
    let sql = format!(
        "SELECT id, name, capacity FROM rooms WHERE id IN ({})",
        sql_placeholders(room_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params_from_iter(room_ids.iter().map(|s| Value::Text(s.clone()))),
        |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let capacity: i64 = row.get(2)?;
            Ok(RoomSpec::with_derived_grid(id, name, capacity.max(0) as usize))
        },
    )?;
    rows.collect()
}

fn plan_result_json(
    plan_id: &str,
    title: &str,
    exam_date: Option<&str>,
    seed: Option<i64>,
    created_at: Option<&str>,
    rooms: &[seating::RoomGrid],
    unassigned: &[String],
) -> serde_json::Value {
    json!({
        "planId": plan_id,
        "title": title,
        "examDate": exam_date,
        "seed": seed,
        "createdAt": created_at,
        "rooms": rooms,
        "unassignedStudentIds": unassigned,
    })
}

fn handle_generate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let class_ids = match string_array_param(&req.params, "classIds") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let room_ids = match string_array_param(&req.params, "roomIds") {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    if class_ids.is_empty() {
        return err(&req.id, "no_students", "no classes selected", None);
    }
    if room_ids.is_empty() {
        return err(&req.id, "no_rooms", "no rooms selected", None);
    }

    let title = req
        .params
        .get("title")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Seating plan".to_string());

    let exam_date = match req.params.get("examDate").and_then(|v| v.as_str()) {
        Some(raw) => {
            let raw = raw.trim();
            if NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_err() {
                return err(
                    &req.id,
                    "bad_params",
                    "examDate must be an ISO date (YYYY-MM-DD)",
                    None,
                );
            }
            Some(raw.to_string())
        }
        None => None,
    };

    let seed = req.params.get("seed").and_then(|v| v.as_u64());

    let reference = reference_branch(conn);

    let students = match load_candidates(conn, &class_ids, &reference) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rooms = match load_rooms(conn, &room_ids) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if rooms.len() != room_ids.len() {
        return err(
            &req.id,
            "not_found",
            "one or more rooms not found",
            Some(json!({ "requested": room_ids.len(), "found": rooms.len() })),
        );
    }

    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let plan = match seating::generate_seating_plan(students, rooms, &mut rng) {
        Ok(p) => p,
        Err(e) => return err(&req.id, &e.code, e.message, None),
    };

    let plan_id = Uuid::new_v4().to_string();
    let seed_i = seed.map(|s| s as i64);

    let tx = match conn.transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "INSERT INTO seating_plans(id, title, exam_date, seed, created_at)
         VALUES(?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&plan_id, &title, exam_date.as_deref(), seed_i),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "seating_plans" })),
        );
    }
    for (i, grid) in plan.rooms.iter().enumerate() {
        if let Err(e) = tx.execute(
            "INSERT INTO seating_plan_rooms(
               plan_id, room_id, room_name, seat_rows, seat_cols, sort_order
             ) VALUES(?, ?, ?, ?, ?, ?)",
            (
                &plan_id,
                &grid.room_id,
                &grid.room_name,
                grid.rows as i64,
                grid.cols as i64,
                i as i64,
            ),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "seating_plan_rooms" })),
            );
        }
        for (r, row) in grid.grid.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                let Some(seat) = cell else {
                    continue;
                };
                if let Err(e) = tx.execute(
                    "INSERT INTO seating_plan_seats(
                       plan_id, room_id, seat_row, seat_col,
                       student_id, register_no, student_name, branch, section, year
                     ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    (
                        &plan_id,
                        &grid.room_id,
                        r as i64,
                        c as i64,
                        &seat.student_id,
                        &seat.register_no,
                        &seat.name,
                        &seat.branch,
                        &seat.section,
                        seat.year,
                    ),
                ) {
                    return err(
                        &req.id,
                        "db_insert_failed",
                        e.to_string(),
                        Some(json!({ "table": "seating_plan_seats" })),
                    );
                }
            }
        }
    }
    for (i, student_id) in plan.unassigned_student_ids.iter().enumerate() {
        if let Err(e) = tx.execute(
            "INSERT INTO seating_plan_unassigned(plan_id, student_id, sort_order)
             VALUES(?, ?, ?)",
            (&plan_id, student_id, i as i64),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "seating_plan_unassigned" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        plan_result_json(
            &plan_id,
            &title,
            exam_date.as_deref(),
            seed_i,
            None,
            &plan.rooms,
            &plan.unassigned_student_ids,
        ),
    )
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let requested = req.params.get("planId").and_then(|v| v.as_str());
    let header = match requested {
        Some(plan_id) => conn
            .query_row(
                "SELECT id, title, exam_date, seed, created_at
                 FROM seating_plans WHERE id = ?",
                [plan_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, Option<String>>(2)?,
                        r.get::<_, Option<i64>>(3)?,
                        r.get::<_, String>(4)?,
                    ))
                },
            )
            .optional(),
        None => conn
            .query_row(
                "SELECT id, title, exam_date, seed, created_at
                 FROM seating_plans ORDER BY created_at DESC, rowid DESC LIMIT 1",
                [],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, Option<String>>(2)?,
                        r.get::<_, Option<i64>>(3)?,
                        r.get::<_, String>(4)?,
                    ))
                },
            )
            .optional(),
    };
    let (plan_id, title, exam_date, seed, created_at) = match header {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "no seating plan found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT room_id, room_name, seat_rows, seat_cols
         FROM seating_plan_rooms WHERE plan_id = ? ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let room_rows = stmt
        .query_map([&plan_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let room_rows = match room_rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut grids: Vec<seating::RoomGrid> = room_rows
        .into_iter()
        .map(|(room_id, room_name, rows, cols)| seating::RoomGrid {
            room_id,
            room_name,
            rows: rows.max(0) as usize,
            cols: cols.max(0) as usize,
            grid: vec![vec![None; cols.max(0) as usize]; rows.max(0) as usize],
        })
        .collect();

    let mut stmt = match conn.prepare(
        "SELECT room_id, seat_row, seat_col,
                student_id, register_no, student_name, branch, section, year
         FROM seating_plan_seats WHERE plan_id = ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let seat_rows = stmt
        .query_map([&plan_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                Seat {
                    student_id: row.get(3)?,
                    register_no: row.get(4)?,
                    name: row.get(5)?,
                    branch: row.get(6)?,
                    section: row.get(7)?,
                    year: row.get(8)?,
                },
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let seat_rows = match seat_rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    for (room_id, r, c, seat) in seat_rows {
        let Some(grid) = grids.iter_mut().find(|g| g.room_id == room_id) else {
            continue;
        };
        let (r, c) = (r.max(0) as usize, c.max(0) as usize);
        if r < grid.rows && c < grid.cols {
            grid.grid[r][c] = Some(seat);
        }
    }

    let mut stmt = match conn.prepare(
        "SELECT student_id FROM seating_plan_unassigned
         WHERE plan_id = ? ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let unassigned = stmt
        .query_map([&plan_id], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let unassigned = match unassigned {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        plan_result_json(
            &plan_id,
            &title,
            exam_date.as_deref(),
            seed,
            Some(&created_at),
            &grids,
            &unassigned,
        ),
    )
}

fn handle_plans_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "plans": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           p.id,
           p.title,
           p.exam_date,
           p.seed,
           p.created_at,
           (SELECT COUNT(*) FROM seating_plan_rooms r WHERE r.plan_id = p.id) AS room_count,
           (SELECT COUNT(*) FROM seating_plan_seats s WHERE s.plan_id = p.id) AS seated_count,
           (SELECT COUNT(*) FROM seating_plan_unassigned u WHERE u.plan_id = p.id)
             AS unassigned_count
         FROM seating_plans p
         ORDER BY p.created_at DESC, p.rowid DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let exam_date: Option<String> = row.get(2)?;
            let seed: Option<i64> = row.get(3)?;
            let created_at: String = row.get(4)?;
            let room_count: i64 = row.get(5)?;
            let seated_count: i64 = row.get(6)?;
            let unassigned_count: i64 = row.get(7)?;
            Ok(json!({
                "id": id,
                "title": title,
                "examDate": exam_date,
                "seed": seed,
                "createdAt": created_at,
                "roomCount": room_count,
                "seatedCount": seated_count,
                "unassignedCount": unassigned_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(plans) => ok(&req.id, json!({ "plans": plans })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_plans_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let plan_id = match req.params.get("planId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing planId", None),
    };

    let tx = match conn.transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    for sql in [
        "DELETE FROM seating_plan_seats WHERE plan_id = ?",
        "DELETE FROM seating_plan_rooms WHERE plan_id = ?",
        "DELETE FROM seating_plan_unassigned WHERE plan_id = ?",
    ] {
        if let Err(e) = tx.execute(sql, [&plan_id]) {
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    }
    let changed = match tx.execute("DELETE FROM seating_plans WHERE id = ?", [&plan_id]) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_delete_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "plan not found", None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "seating.config.get" => Some(handle_config_get(state, req)),
        "seating.config.set" => Some(handle_config_set(state, req)),
        "seating.generate" => Some(handle_generate(state, req)),
        "seating.get" => Some(handle_get(state, req)),
        "seating.plans.list" => Some(handle_plans_list(state, req)),
        "seating.plans.delete" => Some(handle_plans_delete(state, req)),
        _ => None,
    }
}
