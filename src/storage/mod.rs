mod download;
mod feed;
pub(crate) mod files;
pub(crate) mod index;
mod photos;
#[cfg(test)]
mod tests;

pub use download::{prepare_download, Download};
pub use feed::{FeedSnapshot, GalleryFeed};
pub use photos::{AssetSink, LocalAssetStore, Page, StoredAsset, StoredPhoto};
