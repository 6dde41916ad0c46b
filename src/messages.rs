//! Display messages queued inside the target.
//!
//! The target-side communicator keeps a queue of display messages, each message is a sequence
//! of byte arrays. A byte array is read through its `_position` (pointer to the first byte)
//! and `count` (native integer) members, then its bytes are copied out of target memory.

use crate::adapter::ValueRef;
use crate::engine::{Engine, ExecutionResult};
use crate::error::Error;
use crate::session::SessionHandle;
use crate::weak_error;
use log::error;

/// Ordered raw parts of a single message.
pub type DisplayMessage = Vec<Vec<u8>>;

/// Drain the target message queue. Messages that cannot be decoded are skipped.
pub fn drain_messages(engine: &Engine) -> Vec<DisplayMessage> {
    let result = match engine.execute(engine.dialect().drain_messages()) {
        Ok(result) => result,
        Err(e) => {
            error!(target: "kernel", "drain display messages: {e:#}");
            return vec![];
        }
    };

    let ExecutionResult::SuccessWithValue(queue) = result else {
        error!(target: "kernel", "expected value from display message drain, but got: {result}");
        return vec![];
    };

    let session = engine.session();
    let payloads = match session.children(queue.handle) {
        Ok(payloads) => payloads,
        Err(e) => {
            error!(target: "kernel", "read display message queue: {e:#}");
            return vec![];
        }
    };

    payloads
        .into_iter()
        .filter_map(|payload| {
            weak_error!(read_display_message(session, payload), "skip display message:")
        })
        .collect()
}

/// Drain the target message queue and publish every message as is.
pub fn publish_messages(engine: &Engine) {
    for message in drain_messages(engine) {
        weak_error!(
            engine.iopub().publish_multipart(message),
            "publish display message:"
        );
    }
}

fn read_display_message(session: &SessionHandle, payload: ValueRef) -> Result<DisplayMessage, Error> {
    session
        .children(payload)?
        .into_iter()
        .map(|part| read_byte_array(session, part))
        .collect()
}

fn read_byte_array(session: &SessionHandle, part: ValueRef) -> Result<Vec<u8>, Error> {
    let position = session.child_member(part, "_position")?;
    let addr = session.value_data(position)?.read_address(0)?;

    let count = session.child_member(part, "count")?;
    let len = session
        .value_data(count)?
        .read_signed(0, session.int_width()?)?;

    match len {
        // zero-length reads are rejected by adapters
        0 => Ok(vec![]),
        len if len < 0 => Err(Error::InvalidLength(len)),
        len => session.read_memory(addr, len as usize),
    }
}
