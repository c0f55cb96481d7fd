use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};

/// Anything the loader can bring into memory.
pub trait Resource {
    fn name(&self) -> &str;
    fn is_loaded(&self) -> bool;
    fn load(&mut self) -> Result<()>;

    fn free(&mut self) -> Result<()> {
        Ok(())
    }
}

pub type ResourceHandle = Rc<RefCell<dyn Resource>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u32);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "res#{}", self.0)
    }
}

/// Owns every resource created through [`ResourceManager::add`].
#[derive(Default)]
pub struct ResourceManager {
    resources: Vec<(ResourceId, ResourceHandle)>,
    next_id: u32,
}

impl ResourceManager {
    pub fn add<R: Resource + 'static>(&mut self, resource: R) -> (ResourceId, ResourceHandle) {
        let id = ResourceId(self.next_id);
        self.next_id += 1;

        tracing::debug!(target: "engine", %id, name = resource.name(), "registering resource");
        let handle: ResourceHandle = Rc::new(RefCell::new(resource));
        self.resources.push((id, Rc::clone(&handle)));
        (id, handle)
    }

    pub fn get(&self, id: ResourceId) -> Option<ResourceHandle> {
        self.resources
            .iter()
            .find(|(rid, _)| *rid == id)
            .map(|(_, handle)| Rc::clone(handle))
    }

    pub fn get_by_name(&self, name: &str) -> Option<(ResourceId, ResourceHandle)> {
        self.resources
            .iter()
            .find(|(_, handle)| handle.borrow().name() == name)
            .map(|(id, handle)| (*id, Rc::clone(handle)))
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Frees every loaded resource, returning how many frees failed.
    pub fn free_all(&mut self) -> usize {
        let mut failed = 0;
        for (id, handle) in &self.resources {
            let mut resource = handle.borrow_mut();
            if !resource.is_loaded() {
                continue;
            }
            if let Err(err) = resource.free() {
                tracing::warn!(target: "engine", %id, name = resource.name(), "failed to free resource: {err:#}");
                failed += 1;
            }
        }
        failed
    }
}

/// A file read fully into memory on load.
#[derive(Debug)]
pub struct RawAsset {
    name: String,
    path: PathBuf,
    bytes: Option<Vec<u8>>,
}

impl RawAsset {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            bytes: None,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }
}

impl Resource for RawAsset {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_loaded(&self) -> bool {
        self.bytes.is_some()
    }

    fn load(&mut self) -> Result<()> {
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("failed to load \"{}\" from {}", self.name, self.path.display()))?;
        self.bytes = Some(bytes);
        Ok(())
    }

    fn free(&mut self) -> Result<()> {
        self.bytes = None;
        Ok(())
    }
}
