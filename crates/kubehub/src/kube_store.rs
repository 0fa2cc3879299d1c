use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use hookwatch_core::ResourceSnapshot;
use kube::{
    api::{ListParams, WatchEvent, WatchParams},
    core::{DynamicObject, GroupVersionKind, ObjectList, Request},
    discovery::{self, Scope},
    Client, Resource,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::store::{FeedError, Listing, ResourceStore, StoreEvent, StoreStream};

/// Server-side watch timeout; the apiserver caps it below 295s.
const WATCH_TIMEOUT_SECS: u32 = 290;

/// Parse `v1/Kind` or `group/version/Kind`.
pub fn parse_gvk_key(key: &str) -> Result<GroupVersionKind> {
    let parts: Vec<_> = key.split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => {
            Ok(GroupVersionKind { group: String::new(), version: version.to_string(), kind: kind.to_string() })
        }
        [group, version, kind] if !version.is_empty() && !kind.is_empty() => Ok(GroupVersionKind {
            group: (*group).to_string(),
            version: (*version).to_string(),
            kind: (*kind).to_string(),
        }),
        _ => Err(anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key)),
    }
}

fn strip_managed_fields(v: &mut Value) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

// Objects stay raw JSON so one odd field (a numeric annotation, say) never
// fails the whole list or watch event; the normalizer tolerates it.
fn snapshot_from(mut raw: Value) -> Result<ResourceSnapshot, FeedError> {
    if !raw.is_object() {
        return Err(FeedError::Decode(format!("expected an object, got {}", raw)));
    }
    strip_managed_fields(&mut raw);
    Ok(ResourceSnapshot::from_raw(raw))
}

fn listing_from(gvk_key: &str, list: ObjectList<Value>) -> Listing {
    let cursor = list.metadata.resource_version.clone().unwrap_or_default();
    let items = list
        .items
        .into_iter()
        .filter_map(|raw| match snapshot_from(raw) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(gvk = %gvk_key, error = %e, "skipping undecodable resource");
                metrics::counter!("hookwatch_feed_decode_errors_total", 1u64);
                None
            }
        })
        .collect();
    Listing { items, cursor }
}

fn store_event(ev: kube::Result<WatchEvent<Value>>) -> Result<StoreEvent, FeedError> {
    match ev.map_err(FeedError::from_kube)? {
        WatchEvent::Added(o) => snapshot_from(o).map(StoreEvent::Added),
        WatchEvent::Modified(o) => snapshot_from(o).map(StoreEvent::Modified),
        WatchEvent::Deleted(o) => snapshot_from(o).map(StoreEvent::Deleted),
        WatchEvent::Bookmark(b) => Ok(StoreEvent::Bookmark(b.metadata.resource_version)),
        WatchEvent::Error(resp) => Err(FeedError::from_status(resp)),
    }
}

/// Resource store backed by the Kubernetes API for one GVK.
pub struct KubeStore {
    client: Client,
    request: Request,
    gvk_key: String,
}

impl KubeStore {
    /// Resolve `gvk_key` against the cluster and scope requests to `namespace`
    /// (ignored for cluster-scoped kinds).
    pub async fn connect(client: Client, gvk_key: &str, namespace: Option<&str>) -> Result<Self> {
        let gvk = parse_gvk_key(gvk_key)?;
        let (ar, caps) = discovery::pinned_kind(&client, &gvk)
            .await
            .with_context(|| format!("resolving {} via discovery", gvk_key))?;
        let namespaced = matches!(caps.scope, Scope::Namespaced);
        let scope = match (namespaced, namespace) {
            (true, Some(ns)) => Some(ns),
            (false, Some(ns)) => {
                warn!(gvk = %gvk_key, ns = %ns, "kind is cluster-scoped; ignoring namespace scope");
                None
            }
            _ => None,
        };
        let request = Request::new(DynamicObject::url_path(&ar, scope));
        info!(gvk = %gvk_key, ns = ?scope, namespaced, url = %request.url_path, "resource store resolved");
        Ok(Self { client, request, gvk_key: gvk_key.to_string() })
    }
}

#[async_trait::async_trait]
impl ResourceStore for KubeStore {
    async fn list(&self) -> Result<Listing, FeedError> {
        let req = self.request.list(&ListParams::default()).map_err(|e| FeedError::from_kube(kube::Error::BuildRequest(e)))?;
        let list: ObjectList<Value> = self.client.request(req).await.map_err(FeedError::from_kube)?;
        Ok(listing_from(&self.gvk_key, list))
    }

    async fn watch(&self, cursor: &str) -> Result<StoreStream, FeedError> {
        let wp = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        let req = self.request.watch(&wp, cursor).map_err(|e| FeedError::from_kube(kube::Error::BuildRequest(e)))?;
        let stream = self.client.request_events::<Value>(req).await.map_err(FeedError::from_kube)?;
        Ok(stream.map(store_event).boxed())
    }
}
