//! Common utils

#[cfg(all(unix, feature = "utils"))]
mod bind_to_cpu_set;
#[cfg(all(unix, feature = "utils"))]
pub use bind_to_cpu_set::{bind_to_cpu_set, BindError};
