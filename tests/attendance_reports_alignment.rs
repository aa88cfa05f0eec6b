use serde_json::json;
use std::collections::BTreeMap;
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

fn request_ok(
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
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().expect("result")
}

#[test]
fn month_summary_matches_calendar_categories() {
    let workspace = temp_dir("instituted-reports");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        None,
        json!({ "path": workspace.to_string_lossy() }),
    );
    let admin = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.login",
        None,
        json!({ "email": "admin@institute.local", "password": "admin" }),
    )["session"]
        .as_str()
        .expect("session")
        .to_string();
    let employee_id = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "employees.create",
        Some(&admin),
        json!({ "email": "rp@institute.local", "password": "pw", "displayName": "Reporter" }),
    )["employeeId"]
        .as_str()
        .expect("employeeId")
        .to_string();
    let employee = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "auth.login",
        None,
        json!({ "email": "rp@institute.local", "password": "pw" }),
    )["session"]
        .as_str()
        .expect("session")
        .to_string();

    // May 2024: Wednesday the 1st, Sundays on 5/12/19/26.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "holidays.create",
        Some(&admin),
        json!({ "date": "2024-05-01", "name": "Labour Day", "active": true }),
    );
    for (i, (date, present)) in [
        ("2024-05-02", true),
        ("2024-05-03", true),
        ("2024-05-06", false),
        // A present mark on a Sunday overrides the fallback.
        ("2024-05-26", true),
    ]
    .iter()
    .enumerate()
    {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("m{}", i),
            "attendance.mark",
            Some(&employee),
            json!({ "date": date, "present": present }),
        );
    }
    let leave_id = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "leaves.apply",
        Some(&employee),
        json!({ "fromDate": "2024-05-08", "toDate": "2024-05-09", "type": "EARNED" }),
    )["leaveId"]
        .as_str()
        .expect("leaveId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "leaves.decide",
        Some(&admin),
        json!({ "leaveId": leave_id, "status": "APPROVED" }),
    );

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "reports.attendanceSummary",
        Some(&admin),
        json!({ "employeeId": employee_id, "month": "2024-05" }),
    );
    assert_eq!(report["month"], json!("2024-05"));
    assert_eq!(report["present"], json!(3));
    assert_eq!(report["absent"], json!(1));
    assert_eq!(report["holiday"], json!(1));
    assert_eq!(report["leave"]["EARNED"], json!(2));
    assert_eq!(report["sunday"], json!(3));
    assert_eq!(report["unmarked"], json!(21));

    // The report must tally exactly what the calendar renders.
    let view = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "calendar.monthOpen",
        Some(&admin),
        json!({ "employeeId": employee_id, "month": "2024-05" }),
    );
    let days = view["days"].as_array().expect("days");
    assert_eq!(days.len(), 31);
    let mut tally: BTreeMap<String, i64> = BTreeMap::new();
    for d in days {
        let key = d["category"].as_str().expect("category").to_string();
        *tally.entry(key).or_insert(0) += 1;
    }
    assert_eq!(tally.get("PRESENT").copied(), report["present"].as_i64());
    assert_eq!(tally.get("ABSENT").copied(), report["absent"].as_i64());
    assert_eq!(tally.get("HOLIDAY").copied(), report["holiday"].as_i64());
    assert_eq!(tally.get("SUNDAY").copied(), report["sunday"].as_i64());
    assert_eq!(tally.get("BLANK").copied(), report["unmarked"].as_i64());
    assert_eq!(
        tally.get("LEAVE_EARNED").copied(),
        report["leave"]["EARNED"].as_i64()
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
