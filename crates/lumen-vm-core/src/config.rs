//! VM configuration

/// Context configuration
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Register arena size in slots
    pub stack_capacity: usize,
    /// Maximum nested calls
    pub max_call_depth: usize,
    /// Megamorphic property cache entries (rounded up to a power of two)
    pub megamorphic_cache_size: usize,
    /// Enumerator key buffers kept for reuse
    pub iterator_pool_size: usize,
    /// Inline caching; when off every access takes the generic path
    pub inline_caching: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_capacity: 64 * 1024,
            max_call_depth: 1000,
            megamorphic_cache_size: 1024,
            iterator_pool_size: 16,
            inline_caching: true,
        }
    }
}
