use crate::common::{start, FakeAdapter, Node, Reply};
use dbgkernel::adapter::FrameInfo;
use dbgkernel::iopub::{ErrorContent, IoPub, Notification, Published};
use dbgkernel::relay::{OutputRelay, RelayConfig};
use dbgkernel::ExecuteReply;
use serial_test::serial;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn responder(code: &str) -> Reply {
    match code {
        "1 + 1" => Reply::Value(Node::value("2")),
        "let x = 1" => Reply::NoValue,
        "y" => Reply::Fail("error: cannot find 'y' in scope".to_string()),
        "crash()" => Reply::Stdout(
            "Fatal error: boom\n".to_string(),
            Box::new(Reply::Fail("Execution interrupted".to_string())),
        ),
        "print(\"a\")" => Reply::Stdout("a\n".to_string(), Box::new(Reply::NoValue)),
        "print(\"b\")" => Reply::Stdout("b\n".to_string(), Box::new(Reply::NoValue)),
        _ => Reply::NoValue,
    }
}

fn frame(description: &str, file: Option<&str>) -> FrameInfo {
    FrameInfo {
        description: description.to_string(),
        file: file.map(PathBuf::from),
        line: file.map(|_| 1),
    }
}

#[test]
fn test_value_and_statement() {
    let tk = start(FakeAdapter::new(responder));

    let reply = tk.execute("1 + 1");
    assert_eq!(
        reply,
        ExecuteReply::Ok {
            execution_count: 1,
            payload: vec![],
            user_expressions: Default::default(),
        }
    );
    assert_eq!(
        tk.iopub.take(),
        vec![Published::Notification(Notification::plain_result(1, "2"))]
    );

    let reply = tk.execute("let x = 1");
    assert!(reply.is_ok());
    assert!(tk.iopub.take().is_empty());

    // context update, cell, message drain for every cell
    let evaluated = tk.adapter.evaluated_code();
    assert_eq!(evaluated.len(), 6);
    assert!(evaluated[0].contains("updateParentMessage"));
    assert!(evaluated[0].contains(r#"\"msg_id\":\"m1\""#));
    assert_eq!(evaluated[1], "1 + 1");
    assert_eq!(
        evaluated[2],
        "JupyterKernel.communicator.triggerAfterSuccessfulExecution()"
    );
}

#[test]
fn test_compile_error_without_stdout() {
    let tk = start(FakeAdapter::new(responder));
    tk.adapter
        .frames
        .lock()
        .unwrap()
        .push(frame("frame #0: never shown", Some("<Cell 1>")));

    let reply = tk.execute("y");
    assert!(!reply.is_ok());
    assert_eq!(reply.traceback(), ["error: cannot find 'y' in scope"]);
    assert_eq!(
        tk.iopub.take(),
        vec![Published::Notification(Notification::Error(
            ErrorContent::new(vec!["error: cannot find 'y' in scope".to_string()])
        ))]
    );

    // failed cells do not drain display messages
    assert!(!tk
        .adapter
        .evaluated_code()
        .iter()
        .any(|code| code.contains("triggerAfterSuccessfulExecution")));
}

#[test]
fn test_runtime_error_with_stdout_has_filtered_trace() {
    let tk = start(FakeAdapter::new(responder));
    tk.adapter.frames.lock().unwrap().extend([
        frame("frame #0: crash() at <Cell 1>:1:1", Some("<Cell 1>")),
        frame("frame #1: specialized map", Some("<compiler-generated>")),
        frame("frame #2: 0x00007fff libswiftCore.so", None),
        frame("frame #3: main at /src/main.swift:10:3", Some("/src/main.swift")),
    ]);

    let reply = tk.execute("crash()");
    assert_eq!(
        reply.traceback(),
        [
            "Current stack trace:",
            "\tframe #0: crash() at <Cell 1>:1:1",
            "\tframe #3: main at /src/main.swift:10:3",
        ]
    );

    let published = tk.iopub.take();
    assert_eq!(published.len(), 2);
    assert_eq!(
        published[0],
        Published::Notification(Notification::stdout("Fatal error: boom\n"))
    );
    assert!(matches!(
        &published[1],
        Published::Notification(Notification::Error(content)) if content.traceback.len() == 3
    ));
}

#[test]
fn test_missing_include_is_never_evaluated() {
    let tk = start(FakeAdapter::new(responder));

    let reply = tk.execute("let a = 1\n%include \"Nope.swift\"\nprint(a)");
    let traceback = reply.traceback();
    assert_eq!(traceback.len(), 1);
    assert!(traceback[0].starts_with("Line 2: Could not find \"Nope.swift\". Searched ["));

    let evaluated = tk.adapter.evaluated_code();
    assert_eq!(evaluated.len(), 1);
    assert!(evaluated[0].contains("updateParentMessage"));

    let reply = tk.execute("%include Nope.swift");
    assert_eq!(
        reply.traceback(),
        ["Line 1: %include must be followed by a name in quotes"]
    );
}

#[test]
fn test_cells_do_not_interleave_stdout() {
    let tk = start(FakeAdapter::new(responder));

    assert!(tk.execute("print(\"a\")").is_ok());
    assert_eq!(tk.iopub.stdout_chunks(), vec!["a\n"]);
    tk.iopub.take();

    assert!(tk.execute("print(\"b\")").is_ok());
    assert_eq!(tk.iopub.stdout_chunks(), vec!["b\n"]);
}

#[test]
fn test_display_hook_output_stays_with_its_cell() {
    fn printing_drain() -> Reply {
        Reply::Stdout(
            "printed by display hook\n".to_string(),
            Box::new(Reply::Value(Node::list(vec![]))),
        )
    }

    let tk = start(FakeAdapter::new(responder));
    tk.adapter.set_drain_reply(printing_drain);

    assert!(tk.execute("let x = 1").is_ok());
    assert_eq!(tk.iopub.stdout_chunks(), vec!["printed by display hook\n"]);
    tk.iopub.take();

    // nothing is carried over, so the failure stays a compile error
    let reply = tk.execute("y");
    assert_eq!(reply.traceback(), ["error: cannot find 'y' in scope"]);
    assert!(tk.iopub.stdout_chunks().is_empty());
}

#[test]
fn test_output_between_cells_does_not_mark_next_cell() {
    let tk = start(FakeAdapter::new(responder));
    tk.adapter.push_stdout("from a background thread\n");

    let reply = tk.execute("y");
    assert_eq!(reply.traceback(), ["error: cannot find 'y' in scope"]);
    assert_eq!(
        tk.iopub.stdout_chunks(),
        vec!["from a background thread\n"]
    );
}

#[test]
fn test_stdout_read_failure_does_not_fail_cell() {
    let tk = start(FakeAdapter::new(responder));
    tk.adapter.fail_stdout_reads.store(true, Ordering::SeqCst);

    assert!(tk.execute("print(\"a\")").is_ok());
    assert!(tk.iopub.stdout_chunks().is_empty());

    // no output was seen, so no stack trace either
    let reply = tk.execute("crash()");
    assert_eq!(reply.traceback(), ["Execution interrupted"]);
    tk.iopub.take();

    tk.adapter.fail_stdout_reads.store(false, Ordering::SeqCst);
    assert!(tk.execute("let x = 1").is_ok());
    assert_eq!(
        tk.iopub.stdout_chunks(),
        vec!["a\nFatal error: boom\n"]
    );
}

#[test]
fn test_dropped_relay_drains_output() {
    let tk = start(FakeAdapter::new(responder));
    let iopub: Arc<dyn IoPub> = tk.iopub.clone();
    let config = RelayConfig {
        poll_interval: Duration::from_secs(60),
        chunk_size: 4,
    };

    let relay = OutputRelay::start(tk.kernel.session().clone(), iopub, config).unwrap();
    tk.adapter.push_stdout("late output\n");
    drop(relay);

    assert_eq!(tk.iopub.stdout_chunks(), vec!["late output\n"]);
}

#[test]
fn test_cell_file_name_follows_counter() {
    let tk = start(FakeAdapter::new(responder));

    tk.execute("let x = 1");
    tk.execute("1 + 1");
    assert_eq!(tk.kernel.counter().current(), 2);
    assert_eq!(tk.kernel.counter().cell_file_name(), "<Cell 2>");
    assert_eq!(
        tk.iopub.take().last(),
        Some(&Published::Notification(Notification::plain_result(2, "2")))
    );
}

#[test]
fn test_bad_state_report() {
    let tk = start(FakeAdapter::new(responder));
    tk.adapter
        .fail_context_update
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let reply = tk.execute("1 + 1");
    let traceback = reply.traceback();
    assert_eq!(traceback[0], "Kernel is in a bad state. Try restarting the kernel.");
    assert_eq!(traceback[1], "");
    assert_eq!(traceback[2], "Exception in `execute_cell`:");
    assert!(traceback[3].contains("communicator is gone"));

    // the cell itself never runs
    assert!(!tk.adapter.evaluated_code().contains(&"1 + 1".to_string()));
    assert!(matches!(
        tk.iopub.take().as_slice(),
        [Published::Notification(Notification::Error(_))]
    ));

    // kernel keeps serving after a bad state report
    tk.adapter
        .fail_context_update
        .store(false, std::sync::atomic::Ordering::SeqCst);
    assert!(tk.execute("1 + 1").is_ok());
}

#[test]
#[serial]
fn test_include_from_working_directory() {
    let tk = start(FakeAdapter::new(responder));
    let cwd = tempfile::tempdir().unwrap();
    std::fs::write(cwd.path().join("Cwd.swift"), "let fromCwd = true").unwrap();

    let prev = std::env::current_dir().unwrap();
    std::env::set_current_dir(cwd.path()).unwrap();
    let reply = tk.execute("%include \"Cwd.swift\"\nfromCwd");
    std::env::set_current_dir(prev).unwrap();

    assert!(reply.is_ok());
    let cell = &tk.adapter.evaluated_code()[1];
    assert_eq!(
        cell,
        "#sourceLocation(file: \"Cwd.swift\", line: 1)\n\
         let fromCwd = true\n\
         #sourceLocation(file: \"<Cell 1>\", line: 1)\n\
         \n\
         fromCwd"
    );
}
