//! Build pipeline plugins.
//!
//! Registration order is the build-end order:
//! external-global → loader-wrap → dispatch → host-apply → reporter.
//! Each build-end hook relies on the cache state the previous one left.

mod dispatch;
mod external_global;
mod host_apply;
mod loader_wrap;
mod reporter;
pub mod wrapper;

pub use dispatch::{ChangeNotifier, Dispatch, DispatchReport};
pub use external_global::{ExternalGlobal, HOST_GLOBALS};
pub use host_apply::HostApply;
pub use loader_wrap::{LoaderWrap, LoaderWrapOptions};
pub use reporter::{format_elapsed, format_summary, gzip_size, Reporter, SizeRow};
