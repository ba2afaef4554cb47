use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::deferred::Deferred;
use crate::error::{CallError, RpcClientError};
use crate::id::CallId;
use crate::metadata::Metadata;
use crate::stream::ServerOutputStream;

/// Where a call's response payloads go.
#[derive(Debug, Clone)]
pub enum CallOutput {
    /// A single response message.
    Unary(Deferred<Bytes>),
    /// Zero or more response messages.
    Streaming(ServerOutputStream),
}

/// The outstanding completion handles of one call.
#[derive(Debug, Clone)]
pub struct CallEntry {
    pub headers: Option<Deferred<Metadata>>,
    pub output: CallOutput,
    pub trailers: Option<Deferred<Metadata>>,
}

impl CallEntry {
    /// Reject every pending handle and error the stream, if any.
    pub fn fail(&self, error: CallError) {
        if let Some(headers) = &self.headers {
            headers.reject(error.clone());
        }
        if let Some(trailers) = &self.trailers {
            trailers.reject(error.clone());
        }
        match &self.output {
            CallOutput::Unary(response) => {
                response.reject(error);
            }
            CallOutput::Streaming(stream) => stream.notify_error(error),
        }
    }
}

/// Maps call identities to their outstanding handles.
///
/// This is the only state shared between calls. Operations on different ids
/// only contend when they hash to the same shard.
#[derive(Debug)]
pub struct CallRegistry {
    calls: DashMap<CallId, CallEntry, ahash::RandomState>,
    max_calls: Option<usize>,
    // Serializes the limit check with the insert. Removals only shrink the
    // map, so they never need it.
    admission: Mutex<()>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::with_limit(None)
    }

    /// Create a registry that refuses new calls once `max_calls` are outstanding.
    pub fn with_limit(max_calls: Option<usize>) -> Self {
        Self {
            calls: DashMap::default(),
            max_calls,
            admission: Mutex::new(()),
        }
    }

    /// Register the handles of a new call.
    ///
    /// Returns an error if the id is already registered or the limit is reached.
    /// The limit is exact under concurrent registration.
    pub fn register(&self, id: CallId, entry: CallEntry) -> Result<(), RpcClientError> {
        use dashmap::mapref::entry::Entry;

        let _admitted = match self.max_calls {
            Some(limit) => {
                let guard = self.admission.lock();
                if self.calls.len() >= limit {
                    tracing::warn!(call_id = %id, limit, "too many outstanding calls; refusing new call");
                    return Err(RpcClientError::TooManyCalls { limit });
                }
                Some(guard)
            }
            None => None,
        };

        match self.calls.entry(id) {
            Entry::Occupied(_) => Err(RpcClientError::DuplicateCall(id)),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    pub fn lookup(&self, id: CallId) -> Option<CallEntry> {
        self.calls.get(&id).map(|entry| entry.value().clone())
    }

    /// Remove a call. After this, events for `id` are dropped.
    pub fn remove(&self, id: CallId) -> Option<CallEntry> {
        self.calls.remove(&id).map(|(_, entry)| entry)
    }

    pub fn contains(&self, id: CallId) -> bool {
        self.calls.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Remove every registered call.
    pub fn drain(&self) -> Vec<(CallId, CallEntry)> {
        let ids: Vec<CallId> = self.calls.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.remove(id).map(|entry| (id, entry)))
            .collect()
    }
}

impl Default for CallRegistry {
    fn default() -> Self {
        Self::new()
    }
}
