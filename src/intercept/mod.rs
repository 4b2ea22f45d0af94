//! Signal interceptors: transparent wrappers over the runtime's ambient
//! extension points that normalize error/warning signals into
//! [`ErrorReport`](crate::report::ErrorReport)s and feed the shared capture
//! buffer.
//!
//! Interceptors are strictly additive observers. Each one forwards to (or
//! returns) exactly what the wrapped seam would have produced; the original
//! failure mode is preserved unchanged for any other code observing it.
//! Every interceptor is independently start/stop-able with idempotent
//! teardown, so nested test environments don't accumulate wrapper layers.

pub mod console;
pub mod http;
pub mod mutation;
pub mod panics;
pub mod tasks;
