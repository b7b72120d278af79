pub mod cache;
pub mod config;
pub mod panel;
pub mod route;

mod client;

pub use cache::ViewModelCache;
pub use client::{AssemblyClient, ClientError};
pub use config::ConfigStore;
pub use panel::{resolve_list_of_speakers_id, waiting_queue, PanelState, SpeakersPanel};
pub use route::{RouteParams, RouteParamsSource};

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
