//! VM execution context
//!
//! The context owns everything one thread of execution needs: the register
//! stack, the pending error, the megamorphic property cache and the for-in
//! enumerator pool. Realms are shared; contexts are not.

use std::sync::Arc;

use lumen_vm_bytecode::Code;

use crate::config::VmConfig;
use crate::error::{ErrorSlot, VmResult};
use crate::eval::EvalCompiler;
use crate::function::NativeFn;
use crate::inline_cache::MegamorphicCache;
use crate::interpreter::Interpreter;
use crate::iterator::IteratorPool;
use crate::object::{PropertyAttributes, PropertyDescriptor, PropertyKey};
use crate::realm::Realm;
use crate::stack::RegisterStack;
use crate::value::{ObjectRef, Value};

/// Per-thread execution state
pub struct VmContext {
    config: VmConfig,
    realm: Arc<Realm>,
    pub(crate) stack: RegisterStack,
    pub(crate) megamorphic: MegamorphicCache,
    pub(crate) iterators: IteratorPool,
    pub(crate) error: ErrorSlot,
    pub(crate) eval_compiler: Option<Arc<dyn EvalCompiler>>,
    pub(crate) native_construct: bool,
}

impl VmContext {
    /// Context with default configuration and a fresh realm
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    /// Context with explicit configuration and a fresh realm
    pub fn with_config(config: VmConfig) -> Self {
        Self::with_realm(config, Arc::new(Realm::new()))
    }

    /// Context sharing an existing realm
    pub fn with_realm(config: VmConfig, realm: Arc<Realm>) -> Self {
        Self {
            stack: RegisterStack::new(config.stack_capacity, config.max_call_depth),
            megamorphic: MegamorphicCache::new(config.megamorphic_cache_size),
            iterators: IteratorPool::new(config.iterator_pool_size),
            error: ErrorSlot::default(),
            eval_compiler: None,
            native_construct: false,
            config,
            realm,
        }
    }

    /// Configuration
    #[inline]
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// The realm
    #[inline]
    pub fn realm(&self) -> &Arc<Realm> {
        &self.realm
    }

    /// The global object
    #[inline]
    pub fn global(&self) -> &ObjectRef {
        &self.realm.global
    }

    // ==================== Host API ====================

    /// Run global code to completion
    pub fn run(&mut self, code: Arc<Code>) -> VmResult<Value> {
        Interpreter::new().run(self, code)
    }

    /// Call a function value
    pub fn call(&mut self, callee: &Value, this: Value, args: &[Value]) -> VmResult<Value> {
        Interpreter::new().call_function(self, callee, this, args)
    }

    /// Invoke a function value as a constructor
    pub fn construct(&mut self, callee: &Value, args: &[Value]) -> VmResult<Value> {
        Interpreter::new().construct_function(self, callee, args)
    }

    /// Define a writable, enumerable, configurable global property
    pub fn define_global(&self, name: &str, value: Value) {
        self.realm
            .global
            .define_own_property(PropertyKey::from(name), PropertyDescriptor::data(value));
    }

    /// Define a native function on the global object
    pub fn define_native(&self, name: &str, arity: u32, call: NativeFn) -> ObjectRef {
        let function = self.realm.new_native(name, arity, call);
        self.realm.global.define_own_property(
            PropertyKey::from(name),
            PropertyDescriptor::data_with_attrs(Value::Object(function.clone()), PropertyAttributes::hidden()),
        );
        function
    }

    /// Install the compiler used by `eval`
    pub fn set_eval_compiler(&mut self, compiler: Arc<dyn EvalCompiler>) {
        self.eval_compiler = Some(compiler);
    }

    /// Installed eval compiler
    pub fn eval_compiler(&self) -> Option<&Arc<dyn EvalCompiler>> {
        self.eval_compiler.as_ref()
    }

    /// Whether the running native was invoked through `new`
    ///
    /// Only meaningful inside a native body. The `this` it receives is then
    /// the freshly allocated receiver.
    #[inline]
    pub fn is_construct_call(&self) -> bool {
        self.native_construct
    }

    /// Enumerators currently checked out of the pool
    pub fn live_iterators(&self) -> usize {
        self.iterators.live()
    }

    /// Register stack, for inspection
    pub fn stack(&self) -> &RegisterStack {
        &self.stack
    }

    /// Forget all megamorphic cache entries
    pub fn clear_property_cache(&mut self) {
        self.megamorphic.clear();
    }
}

impl Default for VmContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VmContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmContext")
            .field("config", &self.config)
            .field("depth", &self.stack.depth())
            .field("top", &self.stack.top())
            .field("live_iterators", &self.iterators.live())
            .field("error_pending", &self.error.is_set())
            .finish()
    }
}
