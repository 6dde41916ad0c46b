use crate::common::{start_with_iopub, FakeAdapter, Node, Reply, SharedBuf};
use dbgkernel::frontend;
use dbgkernel::iopub::JsonLinesIoPub;
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::Arc;

#[test]
fn test_json_lines_session() {
    let buf = SharedBuf::default();
    let out = Arc::new(JsonLinesIoPub::new(buf.clone()));
    let (kernel, adapter, _dir) = start_with_iopub(
        FakeAdapter::new(|code| match code {
            "40 + 2" => Reply::Value(Node::value("42")),
            _ => Reply::Fail("error: expected expression".to_string()),
        }),
        out.clone(),
    );

    let input = [
        json!({"msg_type": "execute_request", "header": {"msg_id": "a"}, "content": {"code": "40 + 2", "silent": false}}).to_string(),
        "this is not json".to_string(),
        String::new(),
        json!({"msg_type": "execute_request", "header": {"msg_id": "b"}, "content": {"code": "+"}}).to_string(),
        json!({"msg_type": "complete_request", "content": {"code": "pri", "cursor_pos": 3}}).to_string(),
        json!({"msg_type": "shutdown_request", "content": {"restart": false}}).to_string(),
        json!({"msg_type": "execute_request", "content": {"code": "never"}}).to_string(),
    ]
    .join("\n");

    frontend::serve(&kernel, Cursor::new(input), &out).unwrap();

    let lines: Vec<Value> = buf
        .text()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let kinds: Vec<&str> = lines
        .iter()
        .map(|l| l["msg_type"].as_str().unwrap())
        .collect();
    assert_eq!(
        kinds,
        [
            "execute_result",
            "execute_reply",
            "error",
            "execute_reply",
            "complete_reply",
            "shutdown_reply"
        ]
    );

    assert_eq!(lines[0]["content"]["data"]["text/plain"], "42");
    assert_eq!(
        lines[1]["content"],
        json!({"status": "ok", "execution_count": 1, "payload": [], "user_expressions": {}})
    );
    assert_eq!(
        lines[3]["content"],
        json!({
            "status": "error", "execution_count": 2, "ename": "", "evalue": "",
            "traceback": ["error: expected expression"]
        })
    );
    // completion was never enabled
    assert_eq!(lines[4]["content"], Value::Null);
    assert_eq!(lines[5]["content"]["status"], "ok");

    assert!(!adapter.evaluated_code().contains(&"never".to_string()));
}
