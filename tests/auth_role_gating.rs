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

fn session_of(value: &serde_json::Value) -> String {
    value["result"]["session"]
        .as_str()
        .unwrap_or_else(|| panic!("login failed: {}", value))
        .to_string()
}

#[test]
fn sessions_and_roles_gate_every_family() {
    let workspace = temp_dir("instituted-gating");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        None,
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Unknown email and wrong password both come back as one opaque error.
    let bad = request(
        &mut stdin,
        &mut reader,
        "2",
        "auth.login",
        None,
        json!({ "email": "admin@institute.local", "password": "wrong" }),
    );
    assert_eq!(error_code(&bad), "unauthorized");
    let bad = request(
        &mut stdin,
        &mut reader,
        "3",
        "auth.login",
        None,
        json!({ "email": "nobody@institute.local", "password": "admin" }),
    );
    assert_eq!(error_code(&bad), "unauthorized");

    // No session at all.
    let denied = request(
        &mut stdin,
        &mut reader,
        "4",
        "employees.list",
        None,
        json!({}),
    );
    assert_eq!(error_code(&denied), "unauthorized");
    // A made-up token is no better.
    let denied = request(
        &mut stdin,
        &mut reader,
        "5",
        "employees.list",
        Some("not-a-session"),
        json!({}),
    );
    assert_eq!(error_code(&denied), "unauthorized");

    let admin_login = request(
        &mut stdin,
        &mut reader,
        "6",
        "auth.login",
        None,
        json!({ "email": "admin@institute.local", "password": "admin" }),
    );
    let admin = session_of(&admin_login);

    let e1 = request(
        &mut stdin,
        &mut reader,
        "7",
        "employees.create",
        Some(&admin),
        json!({ "email": "plain@institute.local", "password": "pw", "displayName": "Plain" }),
    );
    let e1_id = e1["result"]["employeeId"].as_str().expect("id").to_string();
    let e2 = request(
        &mut stdin,
        &mut reader,
        "8",
        "employees.create",
        Some(&admin),
        json!({
            "email": "tutor@institute.local",
            "password": "pw",
            "displayName": "Tutor",
            "subRole": "TUTOR"
        }),
    );
    let _ = e2;
    let s1 = request(
        &mut stdin,
        &mut reader,
        "9",
        "students.create",
        Some(&admin),
        json!({ "email": "pupil@institute.local", "password": "pw", "displayName": "Pupil" }),
    );
    let s1_id = s1["result"]["studentId"].as_str().expect("id").to_string();

    let plain = session_of(&request(
        &mut stdin,
        &mut reader,
        "10",
        "auth.login",
        None,
        json!({ "email": "plain@institute.local", "password": "pw" }),
    ));
    let tutor = session_of(&request(
        &mut stdin,
        &mut reader,
        "11",
        "auth.login",
        None,
        json!({ "email": "tutor@institute.local", "password": "pw" }),
    ));
    let pupil = session_of(&request(
        &mut stdin,
        &mut reader,
        "12",
        "auth.login",
        None,
        json!({ "email": "pupil@institute.local", "password": "pw" }),
    ));

    // Students never reach admin families.
    let denied = request(
        &mut stdin,
        &mut reader,
        "13",
        "employees.list",
        Some(&pupil),
        json!({}),
    );
    assert_eq!(error_code(&denied), "forbidden");
    // Students cannot apply for leave.
    let denied = request(
        &mut stdin,
        &mut reader,
        "14",
        "leaves.apply",
        Some(&pupil),
        json!({ "fromDate": "2024-05-01", "toDate": "2024-05-01", "type": "SICK" }),
    );
    assert_eq!(error_code(&denied), "forbidden");
    // Employees never reach admin families either.
    let denied = request(
        &mut stdin,
        &mut reader,
        "15",
        "holidays.create",
        Some(&plain),
        json!({ "date": "2024-05-01", "name": "May Day" }),
    );
    assert_eq!(error_code(&denied), "forbidden");

    // Employees may only touch their own records.
    let denied = request(
        &mut stdin,
        &mut reader,
        "16",
        "attendance.mark",
        Some(&tutor),
        json!({ "employeeId": e1_id, "date": "2024-05-02", "present": true }),
    );
    assert_eq!(error_code(&denied), "forbidden");
    let denied = request(
        &mut stdin,
        &mut reader,
        "17",
        "calendar.monthOpen",
        Some(&plain),
        json!({ "employeeId": "someone-else", "month": "2024-05" }),
    );
    assert_eq!(error_code(&denied), "forbidden");

    // Task assignment needs admin or the TUTOR sub-role.
    let denied = request(
        &mut stdin,
        &mut reader,
        "18",
        "tasks.create",
        Some(&plain),
        json!({ "assignedTo": s1_id, "title": "Collect forms" }),
    );
    assert_eq!(error_code(&denied), "forbidden");
    let allowed = request(
        &mut stdin,
        &mut reader,
        "19",
        "tasks.create",
        Some(&tutor),
        json!({ "assignedTo": s1_id, "title": "Collect forms" }),
    );
    assert_eq!(allowed["ok"], json!(true));

    // Feedback flows student -> admin only.
    let denied = request(
        &mut stdin,
        &mut reader,
        "20",
        "feedback.submit",
        Some(&plain),
        json!({ "subject": "x", "body": "y" }),
    );
    assert_eq!(error_code(&denied), "forbidden");
    let denied = request(
        &mut stdin,
        &mut reader,
        "21",
        "feedback.list",
        Some(&pupil),
        json!({}),
    );
    assert_eq!(error_code(&denied), "forbidden");

    // Logout tears the session down; the token dies with it.
    let out = request(
        &mut stdin,
        &mut reader,
        "22",
        "auth.logout",
        Some(&plain),
        json!({}),
    );
    assert_eq!(out["ok"], json!(true));
    let denied = request(
        &mut stdin,
        &mut reader,
        "23",
        "auth.whoami",
        Some(&plain),
        json!({}),
    );
    assert_eq!(error_code(&denied), "unauthorized");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
