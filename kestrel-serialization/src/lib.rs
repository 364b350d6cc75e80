//! # kestrel-serialization
//!
//! Mode-polymorphic traversal of object graphs for checkpoint and restart.
//!
//! A type describes its fields once through [`Visit`]. The same description
//! drives four modes: SIZER computes the packed size, PACK writes bytes, UNPACK
//! reads them back and MAP builds an inspectable [`ObjectMap`].
//!
//! ### Key Submodules:
//! - `serializer`: the mode engine and the [`Visit`] trait
//! - `buffer`: bounds-checked byte cursor used by PACK and UNPACK
//! - `registry`: type-tag registry for polymorphic `Box<dyn Serializable>`
//! - `pointer`: identity remapping for `Rc<RefCell<_>>` and `Arc<Mutex<_>>`

pub mod buffer;
mod containers;
pub mod error;
pub mod object_map;
mod pointer;
pub mod primitive;
pub mod registry;
pub mod serializer;

pub mod prelude {
    pub use crate::error::{SerResult, SerializationError};
    pub use crate::registry::{AsAny, Serializable, SerializableRegistry};
    pub use crate::serializer::{Serializer, SerializerMode, Visit};
}

pub use buffer::BufferAccessor;
pub use error::{SerResult, SerializationError};
pub use object_map::ObjectMap;
pub use primitive::Primitive;
pub use registry::{class_id, AsAny, Serializable, SerializableRegistry, Unset};
pub use serializer::{Serializer, SerializerMode, Visit};
