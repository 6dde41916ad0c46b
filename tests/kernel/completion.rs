use crate::common::{start, FakeAdapter, Reply};
use dbgkernel::adapter::Completion;
use dbgkernel::CompleteReply;

fn adapter_with_completion(prefix: &str, insertables: &[&str]) -> FakeAdapter {
    let mut adapter = FakeAdapter::new(|_| Reply::NoValue);
    adapter.completion = Some(Completion {
        prefix: prefix.to_string(),
        insertables: insertables.iter().map(|s| s.to_string()).collect(),
    });
    adapter
}

#[test]
fn test_completion_is_opt_in() {
    let tk = start(adapter_with_completion("pri", &["nt", "ntln"]));
    assert_eq!(tk.kernel.complete("pri", 3), None);

    assert!(tk.execute("%enableCompletion").is_ok());
    assert_eq!(tk.iopub.stdout_chunks(), vec!["Completion enabled!\n"]);

    assert_eq!(
        tk.kernel.complete("let x = pri", 11),
        Some(CompleteReply {
            status: "ok",
            matches: vec!["print".to_string(), "println".to_string()],
            cursor_start: 8,
            cursor_end: 11,
        })
    );
}

#[test]
fn test_completion_unsupported() {
    let tk = start(FakeAdapter::new(|_| Reply::NoValue));

    assert!(tk.execute("  %enableCompletion").is_ok());
    assert_eq!(
        tk.iopub.stdout_chunks(),
        vec!["Completion NOT enabled because the debug adapter does not support completion.\n"]
    );
    assert_eq!(tk.kernel.complete("pri", 3), None);
}

#[test]
fn test_completion_matches() {
    struct TestCase {
        prefix: &'static str,
        insertables: &'static [&'static str],
        code: &'static str,
        cursor_pos: usize,
        expected_matches: &'static [&'static str],
        expected_start: usize,
    }

    let cases = [
        TestCase {
            prefix: "",
            insertables: &["count", "_storage", "capacity"],
            code: "arr.",
            cursor_pos: 4,
            expected_matches: &["count", "capacity"],
            expected_start: 4,
        },
        TestCase {
            prefix: "_",
            insertables: &["internal"],
            code: "_",
            cursor_pos: 1,
            expected_matches: &[],
            expected_start: 0,
        },
        TestCase {
            // cursor arithmetic is in characters
            prefix: "ré",
            insertables: &["sumé"],
            code: "let é = ré",
            cursor_pos: 10,
            expected_matches: &["résumé"],
            expected_start: 8,
        },
    ];

    for tc in cases {
        let tk = start(adapter_with_completion(tc.prefix, tc.insertables));
        tk.execute("%enableCompletion");

        let reply = tk.kernel.complete(tc.code, tc.cursor_pos).unwrap();
        assert_eq!(reply.matches, tc.expected_matches, "code: {}", tc.code);
        assert_eq!(reply.cursor_start, tc.expected_start, "code: {}", tc.code);
        assert_eq!(reply.cursor_end, tc.cursor_pos);
    }
}
