use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use std::collections::HashSet;
use std::path::PathBuf;
use uuid::Uuid;

const ROSTER_CSV_HEADER: &str = "register_no,last_name,first_name,active";

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(buf);
            buf = String::new();
            i += 1;
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    out.push(buf);
    out
}

fn handle_export_roster_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing outPath", None),
    };

    let class_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let mut stmt = match conn.prepare(
        "SELECT register_no, last_name, first_name, active
         FROM students
         WHERE class_id = ?
         ORDER BY sort_order",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_id], |row| {
            let register_no: String = row.get(0)?;
            let last_name: String = row.get(1)?;
            let first_name: String = row.get(2)?;
            let active: i64 = row.get(3)?;
            Ok(format!(
                "{},{},{},{}",
                csv_quote(&register_no),
                csv_quote(&last_name),
                csv_quote(&first_name),
                if active != 0 { "1" } else { "0" }
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut text = String::with_capacity(rows.len() * 32 + ROSTER_CSV_HEADER.len() + 1);
    text.push_str(ROSTER_CSV_HEADER);
    text.push('\n');
    for row in &rows {
        text.push_str(row);
        text.push('\n');
    }

    let out = PathBuf::from(&out_path);
    if let Some(parent) = out.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            );
        }
    }
    if let Err(e) = std::fs::write(&out, text) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": out_path })),
        );
    }

    ok(
        &req.id,
        json!({ "ok": true, "path": out_path, "studentCount": rows.len() }),
    )
}

fn handle_import_roster_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let in_path = match req.params.get("inPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing inPath", None),
    };

    let class_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let text = match std::fs::read_to_string(&in_path) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": in_path })),
            )
        }
    };

    // Register numbers are unique workspace-wide, so collisions with any
    // class are skipped, not just this one.
    let mut seen: HashSet<String> = HashSet::new();
    {
        let mut stmt = match conn.prepare("SELECT register_no FROM students") {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let existing = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match existing {
            Ok(v) => seen.extend(v),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let mut next_sort: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE class_id = ?",
        [&class_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut warnings: Vec<serde_json::Value> = Vec::new();
    let mut imported = 0usize;
    let mut skipped = 0usize;

    let tx = match conn.transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };
    for (line_no, raw_line) in text.lines().enumerate() {
        if line_no == 0 {
            continue;
        }
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let fields = parse_csv_record(line);
        if fields.len() < 3 {
            warnings.push(json!({
                "line": line_no + 1,
                "code": "bad_columns",
                "message": "expected at least 3 CSV columns"
            }));
            skipped += 1;
            continue;
        }
        let register_no = fields[0].trim().to_string();
        let last_name = fields[1].trim().to_string();
        let first_name = fields[2].trim().to_string();
        if register_no.is_empty() || last_name.is_empty() || first_name.is_empty() {
            warnings.push(json!({
                "line": line_no + 1,
                "code": "empty_field",
                "message": "register_no/last_name/first_name must not be empty"
            }));
            skipped += 1;
            continue;
        }
        if seen.contains(&register_no) {
            warnings.push(json!({
                "line": line_no + 1,
                "code": "duplicate_register_no",
                "message": format!("register number {} already exists", register_no)
            }));
            skipped += 1;
            continue;
        }
        let active = match fields.get(3).map(|s| s.trim().to_ascii_lowercase()) {
            None => true,
            Some(v) if v.is_empty() || v == "1" || v == "true" => true,
            Some(v) if v == "0" || v == "false" => false,
            Some(_) => {
                warnings.push(json!({
                    "line": line_no + 1,
                    "code": "bad_active",
                    "message": "active must be 0/1 or true/false"
                }));
                skipped += 1;
                continue;
            }
        };

        let student_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO students(
               id,
               class_id,
               last_name,
               first_name,
               register_no,
               active,
               sort_order,
               raw_line,
               updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
            (
                &student_id,
                &class_id,
                &last_name,
                &first_name,
                &register_no,
                if active { 1 } else { 0 },
                next_sort,
                raw_line,
            ),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "students", "line": line_no + 1 })),
            );
        }
        seen.insert(register_no);
        next_sort += 1;
        imported += 1;
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "ok": true,
            "imported": imported,
            "skipped": skipped,
            "warnings": warnings
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exchange.exportRosterCsv" => Some(handle_export_roster_csv(state, req)),
        "exchange.importRosterCsv" => Some(handle_import_roster_csv(state, req)),
        _ => None,
    }
}
