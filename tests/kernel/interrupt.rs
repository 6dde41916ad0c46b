use crate::common::{start, FakeAdapter, Reply};
use dbgkernel::relay::{InterruptRelay, InterruptSource};
use dbgkernel::Error;
use nix::errno::Errno;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;

fn responder(code: &str) -> Reply {
    match code {
        "while true {}" => Reply::Stdout(
            "started\n".to_string(),
            Box::new(Reply::BlockUntilInterrupt),
        ),
        _ => Reply::NoValue,
    }
}

#[test]
fn test_idle_interrupt_is_noop() {
    let tk = start(FakeAdapter::new(responder));
    let (tx, rx) = mpsc::channel();
    let relay = InterruptRelay::spawn(tk.kernel.session().clone(), rx).unwrap();

    tx.send(()).unwrap();
    tx.send(()).unwrap();
    drop(tx);
    relay.join();

    assert_eq!(tk.adapter.interrupts.load(Ordering::SeqCst), 0);
    assert!(tk.execute("let x = 1").is_ok());
}

#[test]
fn test_interrupt_unwinds_evaluation() {
    let tk = start(FakeAdapter::new(responder));
    let (tx, rx) = mpsc::channel();
    let relay = InterruptRelay::spawn(tk.kernel.session().clone(), rx).unwrap();

    let reply = thread::scope(|s| {
        let cell = s.spawn(|| tk.execute("while true {}"));
        tk.adapter.wait_blocked();
        assert!(tk.kernel.session().is_evaluating());
        tx.send(()).unwrap();
        cell.join().unwrap()
    });

    assert_eq!(tk.adapter.interrupts.load(Ordering::SeqCst), 1);
    // output came before the interruption, so the error carries a stack trace
    assert_eq!(reply.traceback(), ["Current stack trace:"]);
    assert_eq!(tk.iopub.stdout_chunks(), vec!["started\n"]);

    // target is still alive
    assert!(!tk.kernel.session().is_evaluating());
    assert!(tk.execute("let x = 1").is_ok());

    drop(tx);
    relay.join();
}

/// Source where every wait for a request is preceded by a failed wait.
struct FlakySource {
    requests: mpsc::Receiver<()>,
    failed: bool,
}

impl InterruptSource for FlakySource {
    fn wait(&mut self) -> Result<(), Error> {
        self.failed = !self.failed;
        if self.failed {
            return Err(Error::Syscall("sigwait", Errno::EINTR));
        }
        self.requests.recv().map_err(|_| Error::InterruptSourceClosed)
    }
}

#[test]
fn test_relay_survives_source_errors() {
    let tk = start(FakeAdapter::new(responder));
    let (tx, rx) = mpsc::channel();
    let source = FlakySource {
        requests: rx,
        failed: false,
    };
    let relay = InterruptRelay::spawn(tk.kernel.session().clone(), source).unwrap();

    for expected in 1..=2 {
        let reply = thread::scope(|s| {
            let cell = s.spawn(|| tk.execute("while true {}"));
            tk.adapter.wait_blocked();
            tx.send(()).unwrap();
            cell.join().unwrap()
        });
        assert!(!reply.is_ok());
        assert_eq!(tk.adapter.interrupts.load(Ordering::SeqCst), expected);
    }

    drop(tx);
    relay.join();
}
