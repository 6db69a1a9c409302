// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Assertion handling for scheduler invariants.
//!
//! Programming errors detected by the scheduler (e.g. destroying a semaphore that still has blocked threads) are not
//! panics. They are reported through [assertion_failed], which applies a process-wide [AssertAction]. The default is
//! to print a diagnostic and keep running. Truly unrecoverable conditions go through [fatal] instead, which always
//! aborts.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::{
    cell::Cell,
    io::{
        self,
        BufRead,
        Write,
    },
    str::FromStr,
    sync::atomic::{
        AtomicU8,
        Ordering,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Environment variable that overrides the assertion action.
pub const ASSERT_ACTION_ENV: &str = "SCHED_ASSERT_ACTION";

//======================================================================================================================
// Structures
//======================================================================================================================

/// What to do when a scheduler assertion fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AssertAction {
    /// Print the diagnostic and exit with status 1.
    Abort = 0,
    /// Print the diagnostic and abort, leaving a core dump behind.
    CoreDump = 1,
    /// Print the diagnostic and continue.
    Ignore = 2,
    /// Panic with the diagnostic as the payload.
    Throw = 3,
    /// Raise a breakpoint trap so an attached debugger stops here, then continue.
    Debug = 4,
    /// Ask on the controlling terminal. Falls back to [AssertAction::Ignore] when stdin is not a terminal.
    Prompt = 5,
}

//======================================================================================================================
// Static Variables
//======================================================================================================================

static ASSERT_ACTION: AtomicU8 = AtomicU8::new(AssertAction::Ignore as u8);

thread_local! {
    /// Set while the handler runs so that an assertion raised by the handler itself does not recurse.
    static IN_ASSERT: Cell<bool> = Cell::new(false);
    /// Number of assertion failures observed on this OS thread.
    static FAILURES: Cell<usize> = Cell::new(0);
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Sets the process-wide assertion action.
pub fn set_assert_action(action: AssertAction) {
    ASSERT_ACTION.store(action as u8, Ordering::Relaxed);
}

/// Returns the process-wide assertion action.
pub fn assert_action() -> AssertAction {
    AssertAction::from_u8(ASSERT_ACTION.load(Ordering::Relaxed))
}

/// Applies the assertion action named by [ASSERT_ACTION_ENV], if the variable is set and valid.
pub fn load_assert_action_from_env() {
    if let Ok(value) = ::std::env::var(ASSERT_ACTION_ENV) {
        match AssertAction::from_str(&value) {
            Ok(action) => set_assert_action(action),
            Err(e) => warn!("load_assert_action_from_env(): {:?}", e),
        }
    }
}

/// Number of assertion failures reported on the calling OS thread so far.
pub fn failure_count() -> usize {
    FAILURES.with(|count| count.get())
}

/// Reports a failed scheduler assertion and applies the configured [AssertAction].
pub fn assertion_failed(msg: &str, file: &str, line: u32) {
    FAILURES.with(|count| count.set(count.get() + 1));
    if IN_ASSERT.with(|flag| flag.replace(true)) {
        return;
    }

    error!("assertion failed at {}:{}: {}", file, line, msg);
    eprintln!("Assertion failed at {}:{}: {}", file, line, msg);

    let mut action: AssertAction = assert_action();
    if action == AssertAction::Prompt {
        action = prompt();
    }
    IN_ASSERT.with(|flag| flag.set(false));
    apply(action, msg);
}

/// Reports an unrecoverable scheduler condition and aborts the process.
pub fn fatal(msg: &str) -> ! {
    error!("fatal: {}", msg);
    eprintln!("{}", msg);
    eprintln!("Aborting.");
    ::std::process::abort()
}

fn apply(action: AssertAction, msg: &str) {
    match action {
        AssertAction::Abort => {
            eprintln!("Aborting.");
            ::std::process::exit(1);
        },
        AssertAction::CoreDump => {
            eprintln!("Dumping core.");
            ::std::process::abort();
        },
        AssertAction::Throw => panic!("{}", msg),
        AssertAction::Debug => raise_breakpoint(),
        AssertAction::Ignore | AssertAction::Prompt => eprintln!("Ignoring."),
    }
}

/// Reads a single-letter answer from stdin when it is a terminal.
fn prompt() -> AssertAction {
    if unsafe { libc::isatty(libc::STDIN_FILENO) } == 0 {
        return AssertAction::Ignore;
    }
    let stdin: io::Stdin = io::stdin();
    loop {
        eprint!("<A>bort, <C>ore dump, <I>gnore, <T>hrow, <D>ebug? ");
        if let Err(e) = io::stderr().flush() {
            warn!("prompt(): {:?}", e);
        }
        let mut answer: String = String::new();
        match stdin.lock().read_line(&mut answer) {
            // End of input.
            Ok(0) | Err(_) => return AssertAction::Ignore,
            Ok(_) => {
                if let Ok(action) = AssertAction::from_str(answer.trim()) {
                    if action != AssertAction::Prompt {
                        return action;
                    }
                }
            },
        }
    }
}

#[cfg(unix)]
fn raise_breakpoint() {
    unsafe {
        libc::raise(libc::SIGTRAP);
    }
}

#[cfg(not(unix))]
fn raise_breakpoint() {
    warn!("raise_breakpoint(): debugger traps are not supported on this platform");
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl AssertAction {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => AssertAction::Abort,
            1 => AssertAction::CoreDump,
            3 => AssertAction::Throw,
            4 => AssertAction::Debug,
            5 => AssertAction::Prompt,
            _ => AssertAction::Ignore,
        }
    }
}

/// Accepts either the full action name or its first letter, case-insensitively.
impl FromStr for AssertAction {
    type Err = Fail;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "a" | "abort" => Ok(AssertAction::Abort),
            "c" | "core" | "coredump" => Ok(AssertAction::CoreDump),
            "i" | "ignore" => Ok(AssertAction::Ignore),
            "t" | "throw" => Ok(AssertAction::Throw),
            "d" | "debug" => Ok(AssertAction::Debug),
            "p" | "prompt" => Ok(AssertAction::Prompt),
            _ => {
                let cause: String = format!("unknown assertion action (action={:?})", s);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
