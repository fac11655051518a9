mod model;
mod registry;
mod store;
#[cfg(test)]
mod tests;

pub use model::{Overlay, OverlaySelection};
pub use registry::{OverlayLoader, OverlayRegistry};
pub use store::LocalOverlayStore;
