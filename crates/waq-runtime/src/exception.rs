//! Structured exceptions: throw, catch and rethrow.
//!
//! Compiled code never jumps non-locally. A `try` block pushes a handler
//! frame and runs its body as an ordinary call returning `ExecResult<T>`.
//! `throw` records the exception in the innermost armed frame and returns
//! `Unwind::Exception`, which every intermediate frame forwards with `?`.
//! Back at the `try`, `land` turns that marker into `Landing::Caught` if
//! the frame it owns was the one that received the exception.
//!
//! Frames nest strictly: every `push_handler` is matched by a pop (or an
//! `unwind_to` the same depth) on every path, including the normal one.

use crate::{WasmResult, WasmTrap};

/// Maximum nesting depth of handler frames.
pub const MAX_HANDLERS: usize = 256;

/// Maximum exception payload in bytes.
pub const MAX_PAYLOAD: usize = 64;

/// An in-flight or caught guest exception. The payload is copied by value
/// into a fixed inline buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exception {
    pub tag: u32,
    payload: [u8; MAX_PAYLOAD],
    payload_size: usize,
}

impl Exception {
    /// Traps with `PayloadTooLarge` above `MAX_PAYLOAD` bytes.
    pub fn new(tag: u32, payload: &[u8]) -> Result<Self, WasmTrap> {
        if payload.len() > MAX_PAYLOAD {
            return Err(WasmTrap::PayloadTooLarge);
        }
        let mut buf = [0u8; MAX_PAYLOAD];
        buf[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            tag,
            payload: buf,
            payload_size: payload.len(),
        })
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.payload_size]
    }
}

/// Why a guest computation stopped early.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Unwind {
    /// Fatal fault; never caught by a handler frame.
    #[error(transparent)]
    Trap(#[from] WasmTrap),
    /// An exception is on its way to the frame that recorded it.
    #[error("exception in flight")]
    Exception,
}

/// Result of guest code that may throw.
pub type ExecResult<T> = Result<T, Unwind>;

/// Outcome of a protected region, as seen at its establishment point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Landing<T> {
    /// The body finished without throwing.
    Normal(T),
    /// The body threw and this frame caught it.
    Caught(Exception),
}

#[derive(Debug, Clone, Copy)]
enum HandlerFrame {
    Armed,
    Pending(Exception),
    Handling(Exception),
}

/// Handler frames of one execution context.
#[derive(Debug, Default)]
pub struct ExceptionStack {
    frames: Vec<HandlerFrame>,
    /// Tag of the last exception thrown and not yet landed.
    in_flight: Option<u32>,
}

impl ExceptionStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Establish a handler frame and return its depth (1-based).
    pub fn push_handler(&mut self) -> Result<usize, WasmTrap> {
        if self.frames.len() >= MAX_HANDLERS {
            return Err(WasmTrap::HandlerStackOverflow);
        }
        self.frames.push(HandlerFrame::Armed);
        tracing::trace!(target: "waq::exception", depth = self.frames.len(), "handler pushed");
        Ok(self.frames.len())
    }

    /// Release the innermost frame. Popping an empty stack does nothing.
    pub fn pop_handler(&mut self) {
        self.frames.pop();
    }

    /// Drop every frame above `depth`.
    pub fn unwind_to(&mut self, depth: usize) {
        self.frames.truncate(depth);
    }

    /// Raise an exception.
    ///
    /// Returns the value compiled code propagates: `Unwind::Exception` when
    /// some frame is armed to receive it, otherwise the fatal
    /// `UncaughtException` trap.
    pub fn throw(&mut self, tag: u32, payload: &[u8]) -> Unwind {
        match Exception::new(tag, payload) {
            Ok(exception) => self.deliver(exception),
            Err(trap) => Unwind::Trap(trap),
        }
    }

    /// Re-raise the exception the innermost frame is handling.
    ///
    /// The handling frame is released and the exception goes to the next
    /// armed frame out.
    pub fn rethrow(&mut self) -> Unwind {
        let exception = match self.frames.last() {
            Some(HandlerFrame::Handling(exception)) => *exception,
            _ => return Unwind::Trap(WasmTrap::RethrowWithoutException),
        };
        self.frames.pop();
        self.deliver(exception)
    }

    fn deliver(&mut self, exception: Exception) -> Unwind {
        let armed = self
            .frames
            .iter_mut()
            .rev()
            .find(|frame| matches!(frame, HandlerFrame::Armed));
        match armed {
            Some(frame) => {
                tracing::debug!(target: "waq::exception", tag = exception.tag, "exception thrown");
                *frame = HandlerFrame::Pending(exception);
                self.in_flight = Some(exception.tag);
                Unwind::Exception
            }
            None => Unwind::Trap(WasmTrap::UncaughtException { tag: exception.tag }),
        }
    }

    /// Resolve the result of a body protected by the frame at `depth`.
    ///
    /// Frames the body left behind are discarded. An exception recorded in
    /// this frame lands here and the frame switches to handling it; any
    /// other unwind keeps propagating.
    pub fn land<T>(&mut self, depth: usize, result: ExecResult<T>) -> ExecResult<Landing<T>> {
        self.unwind_to(depth);
        match result {
            Ok(value) => Ok(Landing::Normal(value)),
            Err(Unwind::Trap(trap)) => Err(Unwind::Trap(trap)),
            Err(Unwind::Exception) => {
                let Some(frame) = depth.checked_sub(1).and_then(|i| self.frames.get_mut(i)) else {
                    return Err(Unwind::Exception);
                };
                let HandlerFrame::Pending(exception) = *frame else {
                    return Err(Unwind::Exception);
                };
                *frame = HandlerFrame::Handling(exception);
                self.in_flight = None;
                Ok(Landing::Caught(exception))
            }
        }
    }

    /// Close the outermost boundary: drop every frame and turn an exception
    /// marker that no frame landed into the `UncaughtException` trap.
    pub fn settle<T>(&mut self, result: ExecResult<T>) -> WasmResult<T> {
        self.unwind_to(0);
        let tag = self.in_flight.take();
        result.map_err(|unwind| match unwind {
            Unwind::Trap(trap) => trap,
            Unwind::Exception => {
                let tag = tag.unwrap_or_default();
                tracing::debug!(target: "waq::exception", tag, "exception escaped every handler");
                WasmTrap::UncaughtException { tag }
            }
        })
    }

    /// The exception the innermost handling frame is processing.
    fn handling(&self) -> Option<&Exception> {
        self.frames.iter().rev().find_map(|frame| match frame {
            HandlerFrame::Handling(exception) => Some(exception),
            _ => None,
        })
    }

    /// Tag of the exception currently being handled, if any.
    pub fn current_exception_tag(&self) -> Option<u32> {
        self.handling().map(|exception| exception.tag)
    }

    /// Payload of the exception currently being handled (empty if none).
    pub fn current_exception_payload(&self) -> &[u8] {
        self.handling().map_or(&[][..], Exception::payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throw_without_handler_is_fatal() {
        let mut stack = ExceptionStack::new();
        assert_eq!(
            stack.throw(9, &[]),
            Unwind::Trap(WasmTrap::UncaughtException { tag: 9 })
        );
    }

    #[test]
    fn normal_exit_lands_normal() {
        let mut stack = ExceptionStack::new();
        let depth = stack.push_handler().unwrap();
        let landing = stack.land(depth, Ok(5)).unwrap();
        assert_eq!(landing, Landing::Normal(5));
        stack.pop_handler();
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn innermost_frame_catches() {
        let mut stack = ExceptionStack::new();
        let outer = stack.push_handler().unwrap();
        let inner = stack.push_handler().unwrap();
        let thrown: ExecResult<()> = Err(stack.throw(3, &[1, 2]));
        match stack.land(inner, thrown).unwrap() {
            Landing::Caught(exception) => {
                assert_eq!(exception.tag, 3);
                assert_eq!(exception.payload(), [1, 2]);
            }
            Landing::Normal(()) => panic!("expected a caught exception"),
        }
        assert_eq!(stack.current_exception_tag(), Some(3));
        assert_eq!(stack.current_exception_payload(), &[1, 2]);
        stack.pop_handler();
        assert_eq!(stack.current_exception_tag(), None);
        assert_eq!(stack.current_exception_payload(), &[] as &[u8]);
        assert_eq!(stack.land(outer, Ok(1)).unwrap(), Landing::Normal(1));
    }

    #[test]
    fn rethrow_reaches_outer_frame() {
        let mut stack = ExceptionStack::new();
        let outer = stack.push_handler().unwrap();
        let inner = stack.push_handler().unwrap();
        let thrown: ExecResult<()> = Err(stack.throw(4, &[7]));
        assert!(matches!(stack.land(inner, thrown), Ok(Landing::Caught(_))));

        let rethrown: ExecResult<()> = Err(stack.rethrow());
        // the inner frame no longer owns the exception
        let stale: ExecResult<()> = Err(Unwind::Exception);
        assert_eq!(stack.land(inner, stale), Err(Unwind::Exception));
        match stack.land(outer, rethrown).unwrap() {
            Landing::Caught(exception) => assert_eq!(exception.payload(), [7]),
            Landing::Normal(()) => panic!("expected a caught exception"),
        }
    }

    #[test]
    fn rethrow_without_handling_traps() {
        let mut stack = ExceptionStack::new();
        assert_eq!(stack.rethrow(), Unwind::Trap(WasmTrap::RethrowWithoutException));
        stack.push_handler().unwrap();
        assert_eq!(stack.rethrow(), Unwind::Trap(WasmTrap::RethrowWithoutException));
    }

    #[test]
    fn rethrow_from_outermost_is_fatal() {
        let mut stack = ExceptionStack::new();
        let depth = stack.push_handler().unwrap();
        let thrown: ExecResult<()> = Err(stack.throw(11, &[]));
        stack.land(depth, thrown).unwrap();
        assert_eq!(
            stack.rethrow(),
            Unwind::Trap(WasmTrap::UncaughtException { tag: 11 })
        );
    }

    #[test]
    fn handler_overflow_traps() {
        let mut stack = ExceptionStack::new();
        for _ in 0..MAX_HANDLERS {
            stack.push_handler().unwrap();
        }
        assert_eq!(stack.push_handler(), Err(WasmTrap::HandlerStackOverflow));
    }

    #[test]
    fn oversized_payload_traps() {
        let mut stack = ExceptionStack::new();
        stack.push_handler().unwrap();
        assert_eq!(
            stack.throw(0, &[0; MAX_PAYLOAD + 1]),
            Unwind::Trap(WasmTrap::PayloadTooLarge)
        );
    }

    #[test]
    fn traps_pass_through_land() {
        let mut stack = ExceptionStack::new();
        let depth = stack.push_handler().unwrap();
        let result: ExecResult<()> = Err(WasmTrap::DivisionByZero.into());
        assert_eq!(
            stack.land(depth, result),
            Err(Unwind::Trap(WasmTrap::DivisionByZero))
        );
    }

    #[test]
    fn land_discards_frames_left_by_body() {
        let mut stack = ExceptionStack::new();
        let depth = stack.push_handler().unwrap();
        stack.push_handler().unwrap();
        stack.push_handler().unwrap();
        let thrown: ExecResult<()> = Err(stack.throw(1, &[]));
        // the innermost frame got it, not ours
        assert_eq!(stack.land(depth, thrown), Err(Unwind::Exception));
        assert_eq!(stack.depth(), depth);
    }

    #[test]
    fn payload_is_stored_inline() {
        let exception = Exception::new(2, &[5; MAX_PAYLOAD]).unwrap();
        assert_eq!(exception.payload().len(), MAX_PAYLOAD);
        let empty = Exception::new(2, &[]).unwrap();
        assert!(empty.payload().is_empty());
        assert_eq!(
            Exception::new(2, &[0; MAX_PAYLOAD + 1]),
            Err(WasmTrap::PayloadTooLarge)
        );
    }

    #[test]
    fn settle_turns_stray_exception_into_trap() {
        let mut stack = ExceptionStack::new();
        let outer = stack.push_handler().unwrap();
        let inner = stack.push_handler().unwrap();
        let thrown: ExecResult<()> = Err(stack.throw(6, &[]));
        // the exception sits in the inner frame, the outer one never sees it
        assert_eq!(stack.land(outer, thrown), Err(Unwind::Exception));
        assert_eq!(inner, outer + 1);
        assert_eq!(
            stack.settle::<()>(Err(Unwind::Exception)),
            Err(WasmTrap::UncaughtException { tag: 6 })
        );
        assert_eq!(stack.depth(), 0);
        assert_eq!(stack.settle(Ok(3)), Ok(3));
        assert_eq!(
            stack.settle::<()>(Err(WasmTrap::Unreachable.into())),
            Err(WasmTrap::Unreachable)
        );
    }
}
