//! Downloader building blocks: quality selection, process supervision and
//! proxy resolution.

pub mod process;
pub mod proxy;
pub mod quality;

pub use process::{ProcessCommand, RunningProcess, capture_stdout};
pub use proxy::{ProxyConfig, ResolvedProxy, resolve_proxy};
pub use quality::{parse_quality, select_closest_quality};
