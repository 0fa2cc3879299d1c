//! hookwatch kubehub: the list+watch change feed and its kube-backed store.

#![forbid(unsafe_code)]

mod feed;
mod kube_store;
mod store;

pub use feed::{ChangeFeed, EventSink, FeedOptions};
pub use kube_store::{parse_gvk_key, KubeStore};
pub use store::{FeedError, Listing, ResourceStore, StoreEvent, StoreStream};
