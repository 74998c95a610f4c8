use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_examseatd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn examseatd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "request {} failed: {}",
        method,
        value
    );
    value.get("result").cloned().expect("result")
}

#[test]
fn roster_csv_import_then_export_round_trips() {
    let workspace = temp_dir("examseat-roster-exchange");
    let in_csv = workspace.join("roster-in.csv");
    let out_csv = workspace.join("roster-out.csv");

    // One good row, one quoted-comma name, one short row, one duplicate,
    // one bad active flag.
    std::fs::write(
        &in_csv,
        concat!(
            "register_no,last_name,first_name,active\n",
            "CSE001,Iyer,Asha,1\n",
            "CSE002,\"Rao, Jr\",Vikram,true\n",
            "CSE003,OnlyTwoFields\n",
            "CSE001,Iyer,Asha,1\n",
            "CSE004,Nair,Devi,maybe\n",
            "CSE005,Menon,Kiran,0\n",
        ),
    )
    .expect("write roster csv");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "CSE 1A", "branch": "CSE", "year": 1, "section": "A" }),
    );
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "exchange.importRosterCsv",
        json!({ "classId": class_id, "inPath": in_csv.to_string_lossy() }),
    );
    assert_eq!(imported.get("imported").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(imported.get("skipped").and_then(|v| v.as_u64()), Some(3));
    let warnings = imported
        .get("warnings")
        .and_then(|v| v.as_array())
        .expect("warnings");
    let codes: Vec<&str> = warnings
        .iter()
        .map(|w| w.get("code").and_then(|v| v.as_str()).expect("code"))
        .collect();
    assert_eq!(
        codes,
        vec!["bad_columns", "duplicate_register_no", "bad_active"]
    );

    let students = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.list",
        json!({ "classId": class_id }),
    );
    let students = students
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students");
    assert_eq!(students.len(), 3);
    assert_eq!(
        students[1].get("lastName").and_then(|v| v.as_str()),
        Some("Rao, Jr")
    );
    assert_eq!(
        students[2].get("active").and_then(|v| v.as_bool()),
        Some(false)
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "exchange.exportRosterCsv",
        json!({ "classId": class_id, "outPath": out_csv.to_string_lossy() }),
    );
    assert_eq!(exported.get("studentCount").and_then(|v| v.as_u64()), Some(3));

    let text = std::fs::read_to_string(&out_csv).expect("read exported csv");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "register_no,last_name,first_name,active");
    assert_eq!(lines[1], "CSE001,Iyer,Asha,1");
    assert_eq!(lines[2], "CSE002,\"Rao, Jr\",Vikram,1");
    assert_eq!(lines[3], "CSE005,Menon,Kiran,0");

    // Re-importing the export is a no-op: every register number collides.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "exchange.importRosterCsv",
        json!({ "classId": class_id, "inPath": out_csv.to_string_lossy() }),
    );
    assert_eq!(again.get("imported").and_then(|v| v.as_u64()), Some(0));
    assert_eq!(again.get("skipped").and_then(|v| v.as_u64()), Some(3));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
