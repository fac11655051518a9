mod handlers;
mod server;
#[cfg(test)]
mod tests;

pub use handlers::{ApiError, OverlayAssignment, PageQuery};
pub use server::{GalleryServer, GalleryServerBuilder, GalleryState};
