//! Argument sanitizer for tool invocations
//!
//! The invoker never goes through a shell, but the same argument vector is
//! logged, used to build paths and may be forwarded by the tool itself, so
//! every argument is checked against a fixed denylist before spawning.

use crate::error::{Error, Result};
use std::path::Path;

/// Longest accepted argument, in characters
pub const MAX_ARG_CHARS: usize = 1024;

/// Shell metacharacters and control characters rejected in any argument
const DENIED_CHARS: &[char] = &[
    '|', '&', ';', '$', '`', '<', '>', '*', '?', '(', ')', '{', '}', '[', ']', '\\', '\'', '"',
    '\n', '\r', '\0',
];

/// Return the argument unchanged if it is safe to pass to the tool.
pub fn sanitize_arg(arg: &str) -> Result<&str> {
    let len = arg.chars().count();
    if len > MAX_ARG_CHARS {
        return Err(Error::InvalidArgument {
            reason: format!("argument too long ({} > {} characters)", len, MAX_ARG_CHARS),
        });
    }

    if let Some(c) = arg.chars().find(|c| DENIED_CHARS.contains(c)) {
        return Err(Error::InvalidArgument {
            reason: format!("forbidden character {:?}", c),
        });
    }

    Ok(arg)
}

/// Check a whole argument vector; the first invalid argument aborts.
pub fn sanitize_args<S: AsRef<str>>(args: &[S]) -> Result<()> {
    for (index, arg) in args.iter().enumerate() {
        sanitize_arg(arg.as_ref()).map_err(|e| match e {
            Error::InvalidArgument { reason } => Error::InvalidArgument {
                reason: format!("argument {}: {}", index, reason),
            },
            other => other,
        })?;
    }
    Ok(())
}

/// Convert a path into a tool argument. Paths that are not valid UTF-8
/// cannot be represented as a string argument and are rejected.
pub fn path_arg(path: &Path) -> Result<String> {
    let s = path.to_str().ok_or_else(|| Error::InvalidArgument {
        reason: format!("path is not valid UTF-8: {}", path.display()),
    })?;
    Ok(sanitize_arg(s)?.to_string())
}
