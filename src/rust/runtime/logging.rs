// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::flexi_logger::Logger;
use ::std::sync::Once;

//==============================================================================
// Static Variables
//==============================================================================

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

//==============================================================================
// Standalone Functions
//==============================================================================

/// Initializes logging features. The log specification is read from the `RUST_LOG` environment variable and
/// defaults to warnings only.
pub fn initialize() {
    INIT_LOG.call_once(|| {
        let logger: Logger = match Logger::try_with_env_or_str("warn") {
            Ok(logger) => logger,
            Err(e) => {
                eprintln!("logging::initialize(): invalid log specification ({:?})", e);
                return;
            },
        };
        match logger.start() {
            // The handle must outlive every log call, which in practice means the whole process.
            Ok(handle) => ::std::mem::forget(handle),
            Err(e) => eprintln!("logging::initialize(): failed to start logger ({:?})", e),
        }
    });
}
