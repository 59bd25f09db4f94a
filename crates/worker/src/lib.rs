//! Runtime primitives shared by the mutation queue and its confirmation drivers.
//!
//! * [`spawn`] routes tasks onto the ambient tokio runtime (or a shared
//!   fallback runtime) with class-tagged tracing.
//! * [`join_error_panic_message`] turns a panicked join into a reportable message.
//! * [`DriverRegistry`] keeps status records for long-lived driver tasks.

mod class;
mod panic;
mod registry;
mod spawn;

pub use class::TaskClass;
pub use panic::join_error_panic_message;
pub use registry::{DriverRecord, DriverRegistry};
pub use spawn::spawn;
