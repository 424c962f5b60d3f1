use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use contracts::{MetadataAccessor, MetadataQuery, MetadataTag, MetadataValue, RequestId};

type RequestKey = (MetadataTag, RequestId, Option<u32>);

/// Metadata store backed by hash maps
///
/// Result and input pools share one store. Camera-keyed reads fall back to
/// the logical camera entry.
#[derive(Debug, Default)]
pub struct InMemoryMetadata {
    requests: RwLock<HashMap<RequestKey, MetadataValue>>,
    usecase: RwLock<HashMap<MetadataTag, MetadataValue>>,
    statics: RwLock<HashMap<(MetadataTag, Option<u32>), MetadataValue>>,
}

impl InMemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_for_camera(
        &self,
        tag: MetadataTag,
        request_id: RequestId,
        camera_id: u32,
        value: MetadataValue,
    ) {
        write(&self.requests).insert((tag, request_id, Some(camera_id)), value);
    }

    pub fn set_static(&self, tag: MetadataTag, camera_id: Option<u32>, value: MetadataValue) {
        write(&self.statics).insert((tag, camera_id), value);
    }

    /// Tag present for a request, on the given camera or the logical one
    pub fn contains(&self, tag: MetadataTag, request_id: RequestId, camera_id: Option<u32>) -> bool {
        let requests = read(&self.requests);
        requests.contains_key(&(tag, request_id, camera_id))
            || requests.contains_key(&(tag, request_id, None))
    }

    /// Drop every per-request entry below `request_id`
    pub fn prune_before(&self, request_id: RequestId) {
        write(&self.requests).retain(|(_, id, _), _| *id >= request_id);
    }

    pub fn request_entries(&self) -> usize {
        read(&self.requests).len()
    }
}

impl MetadataAccessor for InMemoryMetadata {
    fn get(&self, query: &MetadataQuery) -> Option<MetadataValue> {
        let requests = read(&self.requests);
        query
            .camera_id
            .and_then(|camera| requests.get(&(query.tag, query.request_id, Some(camera))))
            .or_else(|| requests.get(&(query.tag, query.request_id, None)))
            .cloned()
    }

    fn set(&self, tag: MetadataTag, request_id: RequestId, value: MetadataValue) {
        write(&self.requests).insert((tag, request_id, None), value);
    }

    fn get_usecase(&self, tag: MetadataTag) -> Option<MetadataValue> {
        read(&self.usecase).get(&tag).cloned()
    }

    fn set_usecase(&self, tag: MetadataTag, value: MetadataValue) {
        write(&self.usecase).insert(tag, value);
    }

    fn get_static(&self, tag: MetadataTag, camera_id: Option<u32>) -> Option<MetadataValue> {
        let statics = read(&self.statics);
        statics
            .get(&(tag, camera_id))
            .or_else(|| statics.get(&(tag, None)))
            .cloned()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
