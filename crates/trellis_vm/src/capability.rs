//! Host capabilities: helpers, modifiers, and components.
//!
//! The VM only ever sees capabilities through these traits. A [`Resolver`]
//! turns a specifier string into a [`Capability`]; lookups are cached per
//! constant handle for the life of one render result.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use trellis_foundation::{Error, NodeId, Result, Value};
use trellis_program::{ConstantPool, Handle};
use trellis_reactive::{Tag, ValueRef, combine};

use crate::tree::OutputTree;

/// A cleanup callback run once when its region is torn down.
pub type Destructor = Box<dyn FnOnce()>;

/// Positional arguments passed to a capability.
#[derive(Clone, Default)]
pub struct Arguments {
    /// The argument references, first argument first.
    pub positional: Vec<ValueRef>,
}

impl Arguments {
    /// Wraps positional references.
    #[must_use]
    pub fn new(positional: Vec<ValueRef>) -> Self {
        Self { positional }
    }

    /// Reads every argument.
    ///
    /// # Errors
    /// Returns the first error raised while reading an argument.
    pub fn values(&self) -> Result<Vec<Value>> {
        self.positional.iter().map(|r| r.value()).collect()
    }

    /// Returns the combined tag of every argument.
    #[must_use]
    pub fn tag(&self) -> Tag {
        combine(self.positional.iter().map(|r| r.tag()))
    }

    /// Returns the number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positional.len()
    }

    /// Returns true if there are no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Arguments({})", self.positional.len())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// A pure function over argument values.
///
/// The VM wraps each call site in a compute reference, so a helper only
/// re-runs when one of its arguments changed.
pub trait Helper {
    /// Computes the helper's result.
    ///
    /// # Errors
    /// Returns an error if the computation fails.
    fn call(&self, args: &[Value]) -> Result<Value>;
}

impl<F> Helper for F
where
    F: Fn(&[Value]) -> Result<Value>,
{
    fn call(&self, args: &[Value]) -> Result<Value> {
        self(args)
    }
}

// ============================================================================
// Modifiers
// ============================================================================

/// Creates modifier instances bound to an element.
pub trait ModifierDefinition {
    /// Creates an instance for `element`. It is installed at commit.
    ///
    /// # Errors
    /// Returns an error if the instance cannot be created.
    fn create(&self, element: NodeId, args: &Arguments) -> Result<Box<dyn ModifierInstance>>;
}

/// A live modifier.
pub trait ModifierInstance {
    /// The tag that decides whether [`ModifierInstance::update`] runs.
    fn tag(&self) -> Tag;

    /// Called once at the commit after creation.
    ///
    /// # Errors
    /// Returns an error if installation fails.
    fn install(&mut self, tree: &mut dyn OutputTree) -> Result<()>;

    /// Called at the commit of any pass in which the tag moved.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    fn update(&mut self, tree: &mut dyn OutputTree) -> Result<()>;

    /// Returns the cleanup to run when the modifier is torn down.
    fn destructor(&mut self) -> Option<Destructor> {
        None
    }
}

// ============================================================================
// Components
// ============================================================================

/// Creates component instances and names their layout.
pub trait ComponentDefinition {
    /// Creates an instance from its arguments.
    ///
    /// # Errors
    /// Returns an error if the instance cannot be created.
    fn create(&self, args: &Arguments) -> Result<Box<dyn ComponentInstance>>;

    /// The block rendered with the instance as self.
    fn layout(&self) -> Handle;
}

/// A live component.
pub trait ComponentInstance {
    /// The reference the layout sees as self.
    fn self_ref(&self) -> ValueRef;

    /// The tag that decides whether [`ComponentInstance::update`] runs.
    fn tag(&self) -> Tag;

    /// Called during an update pass when the tag moved.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    fn update(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called at the commit after the first render.
    ///
    /// # Errors
    /// Returns an error if the hook fails.
    fn did_create(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called at the commit of any pass that updated the instance.
    ///
    /// # Errors
    /// Returns an error if the hook fails.
    fn did_update(&mut self) -> Result<()> {
        Ok(())
    }

    /// Returns the cleanup to run when the component is torn down.
    fn destructor(&mut self) -> Option<Destructor> {
        None
    }
}

/// A modifier instance shared by its updating opcode and the transaction.
pub type SharedModifier = Rc<RefCell<Box<dyn ModifierInstance>>>;

/// A component instance shared by its updating opcode and the transaction.
pub type SharedComponent = Rc<RefCell<Box<dyn ComponentInstance>>>;

// ============================================================================
// Resolution
// ============================================================================

/// A resolved capability.
#[derive(Clone)]
pub enum Capability {
    /// A helper.
    Helper(Rc<dyn Helper>),
    /// A modifier.
    Modifier(Rc<dyn ModifierDefinition>),
    /// A component.
    Component(Rc<dyn ComponentDefinition>),
}

impl Capability {
    fn kind(&self) -> &'static str {
        match self {
            Self::Helper(_) => "helper",
            Self::Modifier(_) => "modifier",
            Self::Component(_) => "component",
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability::{}", self.kind())
    }
}

/// Turns specifiers into capabilities.
pub trait Resolver {
    /// Resolves a specifier, or returns `None` if nothing matches.
    fn resolve(&self, specifier: &str) -> Option<Capability>;
}

/// A resolver backed by a name table.
#[derive(Clone, Debug, Default)]
pub struct MapResolver {
    entries: HashMap<String, Capability>,
}

impl MapResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a helper.
    #[must_use]
    pub fn with_helper(mut self, name: &str, helper: impl Helper + 'static) -> Self {
        self.entries
            .insert(name.to_string(), Capability::Helper(Rc::new(helper)));
        self
    }

    /// Registers a modifier.
    #[must_use]
    pub fn with_modifier(mut self, name: &str, modifier: impl ModifierDefinition + 'static) -> Self {
        self.entries
            .insert(name.to_string(), Capability::Modifier(Rc::new(modifier)));
        self
    }

    /// Registers a component.
    #[must_use]
    pub fn with_component(
        mut self,
        name: &str,
        component: impl ComponentDefinition + 'static,
    ) -> Self {
        self.entries
            .insert(name.to_string(), Capability::Component(Rc::new(component)));
        self
    }
}

impl Resolver for MapResolver {
    fn resolve(&self, specifier: &str) -> Option<Capability> {
        self.entries.get(specifier).cloned()
    }
}

/// Per-result cache of resolved capabilities, keyed by string handle.
#[derive(Debug, Default)]
pub struct CapabilityCache {
    resolved: HashMap<u32, Capability>,
}

impl CapabilityCache {
    fn lookup(
        &mut self,
        resolver: &dyn Resolver,
        constants: &ConstantPool,
        specifier: u32,
    ) -> Result<Capability> {
        if let Some(capability) = self.resolved.get(&specifier) {
            return Ok(capability.clone());
        }
        let name = constants.get_string(specifier)?;
        let capability = resolver
            .resolve(name)
            .ok_or_else(|| Error::unresolved(name.to_string()))?;
        self.resolved.insert(specifier, capability.clone());
        Ok(capability)
    }

    /// Resolves a helper.
    ///
    /// # Errors
    /// Returns an unresolved-capability or capability-mismatch error.
    pub fn helper(
        &mut self,
        resolver: &dyn Resolver,
        constants: &ConstantPool,
        specifier: u32,
    ) -> Result<Rc<dyn Helper>> {
        match self.lookup(resolver, constants, specifier)? {
            Capability::Helper(helper) => Ok(helper),
            _ => Err(mismatch(constants, specifier, "helper")),
        }
    }

    /// Resolves a modifier.
    ///
    /// # Errors
    /// Returns an unresolved-capability or capability-mismatch error.
    pub fn modifier(
        &mut self,
        resolver: &dyn Resolver,
        constants: &ConstantPool,
        specifier: u32,
    ) -> Result<Rc<dyn ModifierDefinition>> {
        match self.lookup(resolver, constants, specifier)? {
            Capability::Modifier(modifier) => Ok(modifier),
            _ => Err(mismatch(constants, specifier, "modifier")),
        }
    }

    /// Resolves a component.
    ///
    /// # Errors
    /// Returns an unresolved-capability or capability-mismatch error.
    pub fn component(
        &mut self,
        resolver: &dyn Resolver,
        constants: &ConstantPool,
        specifier: u32,
    ) -> Result<Rc<dyn ComponentDefinition>> {
        match self.lookup(resolver, constants, specifier)? {
            Capability::Component(component) => Ok(component),
            _ => Err(mismatch(constants, specifier, "component")),
        }
    }

    /// Returns how many specifiers have been resolved.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    /// Returns true if nothing has been resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

fn mismatch(constants: &ConstantPool, specifier: u32, expected: &'static str) -> Error {
    let name = constants
        .get_string(specifier)
        .map_or_else(|_| specifier.to_string(), ToString::to_string);
    Error::capability_mismatch(name, expected)
}
