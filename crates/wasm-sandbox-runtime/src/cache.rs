//! Content-addressed artifact cache.
//!
//! Artifacts are keyed by the SHA-256 of their bytecode. The cache holds at
//! most `capacity` artifacts and evicts the oldest insertion first. Cached
//! artifacts are immutable, so a hit behaves exactly like a fresh compile.

use std::collections::VecDeque;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use wasm_sandbox_common::SandboxError;
use wasm_sandbox_core::module::content_hash;
use wasm_sandbox_core::{CompiledModule, WasmEngine};

/// Bounded cache of compiled artifacts.
pub struct ModuleCache {
    entries: DashMap<String, CompiledModule>,
    /// Insertion order, oldest first.
    order: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl ModuleCache {
    /// Create an empty cache holding at most `capacity` artifacts.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Look up an artifact by content hash.
    pub fn get(&self, hash: &str) -> Option<CompiledModule> {
        self.entries.get(hash).map(|entry| entry.value().clone())
    }

    /// Return the cached artifact for `bytes`, compiling it on a miss.
    ///
    /// # Errors
    ///
    /// Propagates compilation errors; failures are never cached.
    pub fn get_or_compile(
        &self,
        engine: &WasmEngine,
        bytes: &[u8],
    ) -> Result<CompiledModule, SandboxError> {
        let hash = content_hash(bytes);

        if let Some(module) = self.get(&hash) {
            debug!(content_hash = %hash, "Artifact cache hit");
            return Ok(module);
        }

        debug!(content_hash = %hash, "Artifact cache miss");
        let module = CompiledModule::compile(engine, bytes)?;
        Ok(self.insert(module))
    }

    /// Insert an artifact, evicting the oldest entries beyond capacity.
    ///
    /// Returns the artifact now cached under the hash, which is the existing
    /// one if another caller inserted it first.
    pub fn insert(&self, module: CompiledModule) -> CompiledModule {
        if self.capacity == 0 {
            return module;
        }

        let hash = module.content_hash().to_string();
        let mut order = self.order.lock();

        if let Some(existing) = self.get(&hash) {
            return existing;
        }

        self.entries.insert(hash.clone(), module.clone());
        order.push_back(hash);

        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.entries.remove(&oldest);
                debug!(content_hash = %oldest, "Evicted artifact");
            }
        }

        module
    }

    /// Returns `true` if an artifact with this hash is cached.
    pub fn contains(&self, hash: &str) -> bool {
        self.entries.contains_key(hash)
    }

    /// Remove every cached artifact.
    pub fn clear(&self) {
        let mut order = self.order.lock();
        order.clear();
        self.entries.clear();
    }

    /// Number of cached artifacts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCache")
            .field("len", &self.entries.len())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
