//! Utilities for working with panic payloads.
//!
//! A handler that panics must not take its connection down; the engine
//! catches the unwind and logs the payload through these helpers.

use std::{any::Any, fmt};

/// Borrowed view of a panic payload that formats it when logged.
///
/// The payload is downcast to `String` or `&'static str` if possible and falls
/// back to a placeholder otherwise.
///
/// ```
/// use binrpc::panic::format_panic;
///
/// let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
/// assert_eq!(format_panic(&*payload).to_string(), "boom");
/// let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
/// assert_eq!(format_panic(&*payload).to_string(), "bang");
/// let payload: Box<dyn std::any::Any + Send> = Box::new(5_u32);
/// assert_eq!(format_panic(&*payload).to_string(), "<non-string panic payload>");
/// ```
#[derive(Clone, Copy)]
#[must_use]
pub struct PanicMessage<'a>(&'a (dyn Any + Send));

impl fmt::Display for PanicMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            f.write_str("<non-string panic payload>")
        }
    }
}

impl fmt::Debug for PanicMessage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PanicMessage").field(&self.to_string()).finish()
    }
}

/// Create a [`PanicMessage`] for the given payload.
///
/// Pass the payload itself (`&*payload`), not the box holding it.
pub fn format_panic(panic: &(dyn Any + Send)) -> PanicMessage<'_> { PanicMessage(panic) }
