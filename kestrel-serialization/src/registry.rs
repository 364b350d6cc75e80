//! Polymorphic reconstruction by persisted type tag.
//!
//! Every serializable type is registered under the 32-bit one-at-a-time hash
//! of its declared name. UNPACK reads that hash back and asks the registry for
//! a blank instance to fill in. Two distinct names that hash to the same id
//! would silently rebuild the wrong type on restart, so that is treated as a
//! fatal configuration error at registration time.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use tracing::{debug, error, info};

use crate::error::{SerResult, SerializationError};
use crate::serializer::{Serializer, SerializerMode, Visit};

/// One-at-a-time hash of a type name.
pub fn class_id(name: &str) -> u32 {
    let mut hash: u32 = 0;
    for byte in name.bytes() {
        hash = hash.wrapping_add(u32::from(byte));
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash.wrapping_add(hash << 15)
}

/// Downcasting support for trait objects.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// An object whose concrete type is recovered from the registry on UNPACK.
pub trait Serializable: AsAny + Send + fmt::Debug {
    /// Declared type name; its hash is the persisted type tag.
    fn type_name(&self) -> &'static str;

    /// Visits this object's fields in a fixed order.
    fn serialize_order(&mut self, ser: &mut Serializer) -> SerResult<()>;

    /// Type tag under the default hash.
    fn cls_id(&self) -> u32 {
        class_id(self.type_name())
    }
}

/// Stand-in value for a polymorphic slot that has not been filled yet.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Unset;

impl Serializable for Unset {
    fn type_name(&self) -> &'static str {
        "kestrel.Unset"
    }

    fn serialize_order(&mut self, _ser: &mut Serializer) -> SerResult<()> {
        Ok(())
    }
}

impl Default for Box<dyn Serializable> {
    fn default() -> Self {
        Box::new(Unset)
    }
}

impl Visit for Box<dyn Serializable> {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        match ser.mode() {
            SerializerMode::Sizer | SerializerMode::Pack => {
                let mut id = ser.registry().hash(self.type_name());
                ser.primitive(&mut id)?;
                self.serialize_order(ser)
            }
            SerializerMode::Unpack => {
                let mut id = 0u32;
                ser.primitive(&mut id)?;
                let mut object = ser.registry().build(id)?;
                object.serialize_order(ser)?;
                *self = object;
                Ok(())
            }
            SerializerMode::Map => {
                ser.mapper_mut().set_type(self.type_name());
                self.serialize_order(ser)
            }
        }
    }
}

type BuildFn = Box<dyn Fn() -> Box<dyn Serializable> + Send + Sync>;

struct Builder {
    name: &'static str,
    build: BuildFn,
}

/// Map from type tag to a builder for a blank instance of that type.
///
/// Created once by the hosting process and shared through an `Arc` with every
/// [`Serializer`]. [`SerializableRegistry::shutdown`] tears it down exactly once.
pub struct SerializableRegistry {
    builders: RwLock<Option<HashMap<u32, Builder>>>,
    hasher: fn(&str) -> u32,
}

impl SerializableRegistry {
    pub fn new() -> Self {
        Self::with_hasher(class_id)
    }

    /// Uses `hasher` in place of the default name hash.
    pub fn with_hasher(hasher: fn(&str) -> u32) -> Self {
        let registry = Self {
            builders: RwLock::new(Some(HashMap::new())),
            hasher,
        };
        registry.register::<Unset>();
        registry
    }

    /// Tag this registry assigns to `name`.
    pub fn hash(&self, name: &str) -> u32 {
        (self.hasher)(name)
    }

    /// Registers `T` under the hash of its declared type name.
    pub fn register<T: Serializable + Default + 'static>(&self) -> u32 {
        let name = T::default().type_name();
        self.register_builder(name, || Box::new(T::default()))
    }

    /// Registers `build` under the hash of `name` and returns that hash.
    ///
    /// Registering the same name again keeps the first builder. A different
    /// name with the same hash panics, as does registering after shutdown.
    pub fn register_builder<F>(&self, name: &'static str, build: F) -> u32
    where
        F: Fn() -> Box<dyn Serializable> + Send + Sync + 'static,
    {
        let id = self.hash(name);
        let mut guard = self.builders.write();
        let Some(builders) = guard.as_mut() else {
            drop(guard);
            error!(name, "serializable registered after registry shutdown");
            panic!("cannot register serializable {name}: registry has been shut down");
        };

        if let Some(existing) = builders.get(&id) {
            let existing = existing.name;
            drop(guard);
            if existing == name {
                debug!(name, id, "serializable already registered");
                return id;
            }
            error!(id, existing, name, "serializable id collision");
            panic!(
                "type names {existing} and {name} both hash to the same serializable id {id:#010x}"
            );
        }

        builders.insert(
            id,
            Builder {
                name,
                build: Box::new(build),
            },
        );
        id
    }

    /// Blank instance of the type registered under `id`.
    pub fn build(&self, id: u32) -> SerResult<Box<dyn Serializable>> {
        let guard = self.builders.read();
        guard
            .as_ref()
            .and_then(|builders| builders.get(&id))
            .map(|builder| (builder.build)())
            .ok_or(SerializationError::UnknownClassId(id))
    }

    pub fn name_of(&self, id: u32) -> Option<&'static str> {
        self.builders
            .read()
            .as_ref()
            .and_then(|builders| builders.get(&id))
            .map(|builder| builder.name)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.name_of(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.builders.read().as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every builder. Returns false if the registry was already down.
    pub fn shutdown(&self) -> bool {
        match self.builders.write().take() {
            Some(builders) => {
                info!(entries = builders.len(), "serializable registry shut down");
                true
            }
            None => false,
        }
    }
}

impl Default for SerializableRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SerializableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializableRegistry")
            .field("entries", &self.len())
            .finish()
    }
}
