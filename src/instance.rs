use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::dispatch::DispatchRequest;
use crate::error::DispatchError;
use crate::response::Response;

/// One concrete endpoint backing a logical service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instance {
    service_id: String,
    instance_id: String,
    host: String,
    port: Option<u16>,
    secure: bool,
    metadata: BTreeMap<String, String>,
}

impl Instance {
    pub fn new(service_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let service_id = service_id.into();
        let host = host.into();
        Self {
            instance_id: format!("{host}:{port}"),
            service_id,
            host,
            port: Some(port),
            secure: false,
            metadata: BTreeMap::new(),
        }
    }

    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Leaves the port out of rewritten targets so the scheme default applies.
    ///
    /// A derived `host:port` id becomes the bare host; an explicit id is kept.
    pub fn default_port(mut self) -> Self {
        if let Some(port) = self.port
            && self.instance_id == format!("{}:{port}", self.host)
        {
            self.instance_id = self.host.clone();
        }
        self.port = None;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn id(&self) -> &str {
        &self.instance_id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn metadata_map(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

/// Maps a logical service name to a concrete instance.
///
/// Implementations are shared across concurrent dispatches and must be safe
/// to call from several threads at once.
pub trait InstanceSelector: Send + Sync {
    fn choose(&self, service_id: &str) -> Option<Instance>;

    /// Picks an instance and applies `request` to it.
    ///
    /// The request is owned for the duration of the call only.
    fn execute(
        &self,
        service_id: &str,
        request: DispatchRequest<'_>,
    ) -> Result<Response, DispatchError> {
        let instance =
            self.choose(service_id)
                .ok_or_else(|| DispatchError::NoInstanceAvailable {
                    service: service_id.to_owned(),
                })?;
        self.execute_on(service_id, &instance, request)
    }

    /// Applies `request` to an instance this selector already chose.
    ///
    /// Every attempt of a retrying dispatch goes through here, so wrapping
    /// selectors see each execution.
    fn execute_on(
        &self,
        _service_id: &str,
        instance: &Instance,
        request: DispatchRequest<'_>,
    ) -> Result<Response, DispatchError> {
        request.apply(instance)
    }
}

#[derive(Debug, Default)]
pub struct RoundRobinInstanceSelector {
    instances: HashMap<String, Vec<Instance>>,
    next: AtomicUsize,
}

impl RoundRobinInstanceSelector {
    pub fn new<I>(instances: I) -> Self
    where
        I: IntoIterator<Item = Instance>,
    {
        let mut grouped: HashMap<String, Vec<Instance>> = HashMap::new();
        for instance in instances {
            grouped
                .entry(instance.service_id().to_owned())
                .or_default()
                .push(instance);
        }
        Self {
            instances: grouped,
            next: AtomicUsize::new(0),
        }
    }

    pub fn instance_count(&self, service_id: &str) -> usize {
        self.instances.get(service_id).map_or(0, Vec::len)
    }
}

impl InstanceSelector for RoundRobinInstanceSelector {
    fn choose(&self, service_id: &str) -> Option<Instance> {
        let candidates = self.instances.get(service_id)?;
        if candidates.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        Some(candidates[index % candidates.len()].clone())
    }
}
