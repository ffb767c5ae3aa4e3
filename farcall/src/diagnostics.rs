// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Debug-only capture of the last batch sent.
//!
//! Single-writer and thread-local; intended for tests that need to
//! assert wire shapes (alias markers, filtered items) and for poking at
//! a misbehaving client. Off by default.

use std::cell::{Cell, RefCell};

thread_local! {
    static CAPTURE: Cell<bool> = const { Cell::new(false) };
    static LAST_BATCH: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Turn capture of outgoing batch envelopes on or off.
pub fn capture(enabled: bool) {
    CAPTURE.with(|c| c.set(enabled));
    if !enabled {
        LAST_BATCH.with(|l| *l.borrow_mut() = None);
    }
}

/// Whether capture is currently enabled.
pub fn is_capturing() -> bool {
    CAPTURE.with(|c| c.get())
}

/// The encoded text of the last batch sent on this thread, if capture
/// was enabled when it went out.
pub fn last_batch() -> Option<String> {
    LAST_BATCH.with(|l| l.borrow().clone())
}

pub(crate) fn record_batch(body: &str) {
    if is_capturing() {
        LAST_BATCH.with(|l| *l.borrow_mut() = Some(body.to_owned()));
    }
}
