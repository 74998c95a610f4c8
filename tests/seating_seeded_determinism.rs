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
fn pinned_seed_reproduces_identical_grids() {
    let workspace = temp_dir("examseat-seeded");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let mut class_ids: Vec<String> = Vec::new();
    for (i, branch) in ["CSE", "ECE", "MECH"].iter().enumerate() {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "classes.create",
            json!({ "name": format!("{} 1A", branch), "branch": branch, "year": 1, "section": "A" }),
        );
        let class_id = created
            .get("classId")
            .and_then(|v| v.as_str())
            .expect("classId")
            .to_string();
        for s in 0..10 {
            let _ = request_ok(
                &mut stdin,
                &mut reader,
                &format!("s{}-{}", i, s),
                "students.create",
                json!({
                    "classId": class_id,
                    "lastName": format!("{}{:03}", branch, s),
                    "firstName": "Test",
                    "registerNo": format!("{}{:03}", branch, s),
                }),
            );
        }
        class_ids.push(class_id);
    }

    let room = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "rooms.create",
        json!({ "name": "R1", "capacity": 30 }),
    );
    let room_id = room
        .get("id")
        .and_then(|v| v.as_str())
        .expect("room id")
        .to_string();

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "seating.generate",
        json!({ "classIds": class_ids, "roomIds": [room_id], "seed": 1234 }),
    );
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "g2",
        "seating.generate",
        json!({ "classIds": class_ids, "roomIds": [room_id], "seed": 1234 }),
    );

    // Plan ids differ; the layout must not.
    assert_ne!(
        first.get("planId").and_then(|v| v.as_str()),
        second.get("planId").and_then(|v| v.as_str())
    );
    assert_eq!(first.get("rooms"), second.get("rooms"));
    assert_eq!(
        first.get("unassignedStudentIds"),
        second.get("unassignedStudentIds")
    );
    assert_eq!(first.get("seed").and_then(|v| v.as_i64()), Some(1234));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
