//! Identity-preserving traversal of shared pointers.
//!
//! A shared handle is written as an identity token (the address the pointee
//! had while packing) followed by the pointee's fields, but only on the first
//! sighting of that token. On UNPACK the token is looked up in a remap table
//! before anything is allocated: later sightings of the same token resolve to
//! the handle built for the first one. The token is a lookup key only and is
//! never turned back into an address.

use std::any::{type_name, Any};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{SerResult, SerializationError};
use crate::serializer::{Serializer, SerializerMode, Visit};

#[derive(Default)]
pub(crate) struct PointerTables {
    packed: HashSet<u64>,
    unpacked: HashMap<u64, Box<dyn Any>>,
}

impl PointerTables {
    pub(crate) fn reset(&mut self) {
        self.packed.clear();
        self.unpacked.clear();
    }

    /// True the first time `token` is seen in this traversal.
    fn first_sighting(&mut self, token: u64) -> bool {
        self.packed.insert(token)
    }

    fn resolve<P: Clone + 'static>(&self, token: u64) -> SerResult<Option<P>> {
        match self.unpacked.get(&token) {
            None => Ok(None),
            Some(handle) => handle.downcast_ref::<P>().cloned().map(Some).ok_or(
                SerializationError::PointerTypeMismatch {
                    token,
                    expected: type_name::<P>(),
                },
            ),
        }
    }

    fn record<P: Clone + 'static>(&mut self, token: u64, handle: &P) {
        self.unpacked.insert(token, Box::new(handle.clone()));
    }

    pub(crate) fn unpacked_len(&self) -> usize {
        self.unpacked.len()
    }
}

/// Shared handle types that can take part in identity remapping.
trait SharedHandle: Clone + Default + 'static {
    fn identity(&self) -> u64;
    fn visit_pointee(&self, ser: &mut Serializer) -> SerResult<()>;
}

impl<T: Visit + Default + 'static> SharedHandle for Rc<RefCell<T>> {
    fn identity(&self) -> u64 {
        Rc::as_ptr(self) as *const () as usize as u64
    }

    fn visit_pointee(&self, ser: &mut Serializer) -> SerResult<()> {
        self.borrow_mut().visit(ser)
    }
}

impl<T: Visit + Default + 'static> SharedHandle for Arc<Mutex<T>> {
    fn identity(&self) -> u64 {
        Arc::as_ptr(self) as *const () as usize as u64
    }

    fn visit_pointee(&self, ser: &mut Serializer) -> SerResult<()> {
        self.lock().visit(ser)
    }
}

fn visit_shared<P: SharedHandle>(handle: &mut P, ser: &mut Serializer) -> SerResult<()> {
    match ser.mode() {
        SerializerMode::Sizer | SerializerMode::Pack => {
            let mut token = handle.identity();
            ser.primitive(&mut token)?;
            if ser.pointers_mut().first_sighting(token) {
                handle.visit_pointee(ser)?;
            }
            Ok(())
        }
        SerializerMode::Unpack => {
            let mut token = 0u64;
            ser.primitive(&mut token)?;
            if let Some(existing) = ser.pointers_mut().resolve::<P>(token)? {
                *handle = existing;
                return Ok(());
            }
            let fresh = P::default();
            // registered before its fields so that cycles land on `fresh`
            ser.pointers_mut().record(token, &fresh);
            fresh.visit_pointee(ser)?;
            *handle = fresh;
            Ok(())
        }
        SerializerMode::Map => {
            let token = handle.identity();
            match ser.mapper_mut().sighting(token) {
                Some(first) => {
                    ser.mapper_mut().set_alias(first);
                    Ok(())
                }
                None => handle.visit_pointee(ser),
            }
        }
    }
}

impl<T: Visit + Default + 'static> Visit for Rc<RefCell<T>> {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        visit_shared(self, ser)
    }
}

impl<T: Visit + Default + 'static> Visit for Arc<Mutex<T>> {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        visit_shared(self, ser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_map::ObjectMap;
    use crate::registry::SerializableRegistry;

    #[derive(Debug, Default)]
    struct Node {
        value: u32,
        next: Option<Rc<RefCell<Node>>>,
    }

    impl Visit for Node {
        fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
            ser.field("value", &mut self.value)?;
            ser.field("next", &mut self.next)
        }
    }

    #[derive(Debug, Default)]
    struct TwoOwners {
        left: Rc<RefCell<Node>>,
        right: Rc<RefCell<Node>>,
    }

    impl Visit for TwoOwners {
        fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
            ser.field("left", &mut self.left)?;
            ser.field("right", &mut self.right)
        }
    }

    fn roundtrip<T: Visit + Default>(value: &mut T) -> T {
        let mut ser = Serializer::new(Arc::new(SerializableRegistry::new()));
        ser.start_sizing();
        ser.visit(value).unwrap();
        ser.start_packing(ser.size());
        ser.visit(value).unwrap();
        let bytes = ser.finish_packing().unwrap();
        let mut restored = T::default();
        ser.start_unpacking(bytes);
        ser.visit(&mut restored).unwrap();
        restored
    }

    #[test]
    fn aliased_fields_unpack_to_one_instance() {
        let shared = Rc::new(RefCell::new(Node {
            value: 17,
            next: None,
        }));
        let mut owners = TwoOwners {
            left: Rc::clone(&shared),
            right: shared,
        };

        let restored = roundtrip(&mut owners);
        assert!(Rc::ptr_eq(&restored.left, &restored.right));
        assert!(!Rc::ptr_eq(&restored.left, &owners.left));
        assert_eq!(restored.left.borrow().value, 17);

        restored.left.borrow_mut().value = 3;
        assert_eq!(restored.right.borrow().value, 3);
    }

    #[test]
    fn second_sighting_packs_only_the_token() {
        let shared = Rc::new(RefCell::new(Node::default()));
        let mut ser = Serializer::new(Arc::new(SerializableRegistry::new()));
        let mut owners = TwoOwners {
            left: Rc::clone(&shared),
            right: shared,
        };
        ser.start_sizing();
        ser.visit(&mut owners).unwrap();
        // token + value + none-flag, then a bare token
        assert_eq!(ser.size(), 8 + 4 + 1 + 8);
    }

    #[test]
    fn cycles_resolve_to_the_reconstructed_head() {
        let head = Rc::new(RefCell::new(Node {
            value: 1,
            next: None,
        }));
        let tail = Rc::new(RefCell::new(Node {
            value: 2,
            next: Some(Rc::clone(&head)),
        }));
        head.borrow_mut().next = Some(Rc::clone(&tail));

        let mut root = TwoOwners {
            left: Rc::clone(&head),
            right: Rc::clone(&tail),
        };
        let restored = roundtrip(&mut root);
        let new_head = Rc::clone(&restored.left);
        let new_tail = restored.left.borrow().next.clone().unwrap();
        assert!(Rc::ptr_eq(&new_tail, &restored.right));
        let back = new_tail.borrow().next.clone().unwrap();
        assert!(Rc::ptr_eq(&back, &new_head));
        assert_eq!(new_tail.borrow().value, 2);

        // break the cycles so the test does not leak
        head.borrow_mut().next = None;
        new_head.borrow_mut().next = None;
    }

    #[test]
    fn arc_mutex_identity_is_preserved() {
        #[derive(Debug, Default)]
        struct Pair {
            a: Arc<Mutex<u64>>,
            b: Arc<Mutex<u64>>,
        }
        impl Visit for Pair {
            fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
                ser.visit(&mut self.a)?;
                ser.visit(&mut self.b)
            }
        }

        let counter = Arc::new(Mutex::new(41));
        let mut pair = Pair {
            a: Arc::clone(&counter),
            b: counter,
        };
        let restored = roundtrip(&mut pair);
        assert!(Arc::ptr_eq(&restored.a, &restored.b));
        assert_eq!(*restored.b.lock(), 41);
    }

    #[test]
    fn mismatched_types_under_one_token_are_rejected() {
        #[derive(Debug, Default)]
        struct Confused {
            a: Rc<RefCell<u32>>,
            b: Rc<RefCell<u64>>,
        }
        impl Visit for Confused {
            fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
                ser.visit(&mut self.a)?;
                ser.visit(&mut self.b)
            }
        }

        // token 7 with a u32 pointee, then token 7 again claiming to be a u64
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&7u64.to_le_bytes());
        bytes.extend_from_slice(&5u32.to_le_bytes());
        bytes.extend_from_slice(&7u64.to_le_bytes());

        let mut ser = Serializer::new(Arc::new(SerializableRegistry::new()));
        ser.start_unpacking(bytes);
        let mut target = Confused::default();
        assert!(matches!(
            ser.visit(&mut target),
            Err(SerializationError::PointerTypeMismatch { token: 7, .. })
        ));
        assert_eq!(ser.pointers_mut().unpacked_len(), 1);
    }

    #[test]
    fn map_mode_reports_aliases() {
        let shared = Rc::new(RefCell::new(Node {
            value: 5,
            next: None,
        }));
        let mut owners = TwoOwners {
            left: Rc::clone(&shared),
            right: shared,
        };
        let mut ser = Serializer::new(Arc::new(SerializableRegistry::new()));
        ser.start_mapping("owners");
        ser.visit(&mut owners).unwrap();
        let map = ser.finish_mapping().unwrap();
        assert_eq!(map.lookup("left/value").and_then(ObjectMap::value), Some("5"));
        assert_eq!(
            map.get("right"),
            Some(&ObjectMap::Alias {
                target: "/left".into()
            })
        );
    }
}
