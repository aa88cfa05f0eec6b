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
    let exe = env!("CARGO_BIN_EXE_instituted");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn instituted");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    session: Option<&str>,
    params: serde_json::Value,
) -> serde_json::Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(token) = session {
        payload["session"] = json!(token);
    }
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn result_str(value: &serde_json::Value, key: &str) -> String {
    value
        .get("result")
        .and_then(|r| r.get(key))
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing result.{} in {}", key, value))
        .to_string()
}

#[test]
fn leave_application_decision_and_balance() {
    let workspace = temp_dir("instituted-leaves");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        None,
        json!({ "path": workspace.to_string_lossy() }),
    );
    let admin = result_str(
        &request(
            &mut stdin,
            &mut reader,
            "2",
            "auth.login",
            None,
            json!({ "email": "admin@institute.local", "password": "admin" }),
        ),
        "session",
    );
    let employee_id = result_str(
        &request(
            &mut stdin,
            &mut reader,
            "3",
            "employees.create",
            Some(&admin),
            json!({ "email": "lv@institute.local", "password": "pw", "displayName": "Leaver" }),
        ),
        "employeeId",
    );
    let employee = result_str(
        &request(
            &mut stdin,
            &mut reader,
            "4",
            "auth.login",
            None,
            json!({ "email": "lv@institute.local", "password": "pw" }),
        ),
        "session",
    );

    // Reversed range is rejected outright.
    let bad = request(
        &mut stdin,
        &mut reader,
        "5",
        "leaves.apply",
        Some(&employee),
        json!({ "fromDate": "2024-04-10", "toDate": "2024-04-08", "type": "SICK" }),
    );
    assert_eq!(error_code(&bad), "bad_params");
    // So is a malformed date.
    let bad = request(
        &mut stdin,
        &mut reader,
        "6",
        "leaves.apply",
        Some(&employee),
        json!({ "fromDate": "10-04-2024", "toDate": "2024-04-10", "type": "SICK" }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    // Three-day sick leave, lower-case type is normalised on the way in.
    let sick = result_str(
        &request(
            &mut stdin,
            &mut reader,
            "7",
            "leaves.apply",
            Some(&employee),
            json!({
                "fromDate": "2024-04-08",
                "toDate": "2024-04-10",
                "type": "sick",
                "reason": "flu"
            }),
        ),
        "leaveId",
    );
    let casual = result_str(
        &request(
            &mut stdin,
            &mut reader,
            "8",
            "leaves.apply",
            Some(&employee),
            json!({ "fromDate": "2024-04-15", "toDate": "2024-04-15", "type": "CASUAL" }),
        ),
        "leaveId",
    );

    // Both show up in the admin's pending queue.
    let pending = request(
        &mut stdin,
        &mut reader,
        "9",
        "leaves.pending",
        Some(&admin),
        json!({}),
    );
    let queue = pending["result"]["leaves"].as_array().expect("leaves");
    assert_eq!(queue.len(), 2);
    let sick_entry = queue
        .iter()
        .find(|l| l["id"] == json!(sick.clone()))
        .expect("sick leave in queue");
    assert_eq!(sick_entry["type"], json!("SICK"));
    assert_eq!(sick_entry["status"], json!("PENDING"));

    // Only APPROVED / REJECTED are legal decisions.
    let bad = request(
        &mut stdin,
        &mut reader,
        "10",
        "leaves.decide",
        Some(&admin),
        json!({ "leaveId": sick, "status": "MAYBE" }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    let decided = request(
        &mut stdin,
        &mut reader,
        "11",
        "leaves.decide",
        Some(&admin),
        json!({ "leaveId": sick, "status": "APPROVED" }),
    );
    assert_eq!(decided["ok"], json!(true));
    // A decided leave cannot be decided again.
    let again = request(
        &mut stdin,
        &mut reader,
        "12",
        "leaves.decide",
        Some(&admin),
        json!({ "leaveId": sick, "status": "REJECTED" }),
    );
    assert_eq!(error_code(&again), "conflict");

    let rejected = request(
        &mut stdin,
        &mut reader,
        "13",
        "leaves.decide",
        Some(&admin),
        json!({ "leaveId": casual, "status": "REJECTED" }),
    );
    assert_eq!(rejected["ok"], json!(true));

    // Rejected leave never reaches the calendar.
    let april = request(
        &mut stdin,
        &mut reader,
        "14",
        "calendar.monthOpen",
        Some(&employee),
        json!({ "month": "2024-04" }),
    );
    let days = april["result"]["days"].as_array().expect("days");
    let day15 = days
        .iter()
        .find(|d| d["date"] == json!("2024-04-15"))
        .expect("day entry");
    assert!(day15["status"].is_null());
    let day9 = days
        .iter()
        .find(|d| d["date"] == json!("2024-04-09"))
        .expect("day entry");
    assert_eq!(day9["status"], json!("LEAVE_SICK"));

    // Allotment of 10 minus the 3 approved days leaves 7.
    let _ = request(
        &mut stdin,
        &mut reader,
        "15",
        "leaves.setAllotment",
        Some(&admin),
        json!({ "employeeId": employee_id, "type": "SICK", "totalDays": 10 }),
    );
    let balance = request(
        &mut stdin,
        &mut reader,
        "16",
        "leaves.balance",
        Some(&employee),
        json!({}),
    );
    let entries = balance["result"]["balance"].as_array().expect("balance");
    let sick_entry = entries
        .iter()
        .find(|e| e["type"] == json!("SICK"))
        .expect("SICK entry");
    assert_eq!(sick_entry["allotted"].as_f64(), Some(10.0));
    assert_eq!(sick_entry["used"].as_f64(), Some(3.0));
    assert_eq!(sick_entry["remaining"].as_f64(), Some(7.0));
    // The rejected CASUAL day counts nothing.
    assert!(entries.iter().all(|e| e["type"] != json!("CASUAL")));

    // The employee's own history lists both applications with final states.
    let listing = request(
        &mut stdin,
        &mut reader,
        "17",
        "leaves.list",
        Some(&employee),
        json!({}),
    );
    let history = listing["result"]["leaves"].as_array().expect("leaves");
    assert_eq!(history.len(), 2);
    let status_of = |id: &str| {
        history
            .iter()
            .find(|l| l["id"] == json!(id))
            .map(|l| l["status"].clone())
            .unwrap_or_else(|| panic!("missing leave {}", id))
    };
    assert_eq!(status_of(&sick), json!("APPROVED"));
    assert_eq!(status_of(&casual), json!("REJECTED"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
