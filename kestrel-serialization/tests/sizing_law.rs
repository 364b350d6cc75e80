//! Property tests for the traversal engine.
//!
//! - Sizing law: a PACK into exactly `size()` bytes never overruns and fills
//!   the buffer completely.
//! - Restore law: UNPACK of a PACK yields an equal value and consumes every byte.
//! - Short buffers: PACK into fewer bytes always fails with an overrun.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use kestrel_serialization::prelude::*;
use proptest::prelude::*;

#[derive(Debug, Default, Clone, PartialEq)]
struct Record {
    id: u64,
    tags: HashSet<u16>,
    name: String,
    history: Vec<(i32, Option<f32>)>,
    index: BTreeMap<String, u8>,
}

impl Visit for Record {
    fn visit(&mut self, ser: &mut Serializer) -> SerResult<()> {
        ser.field("id", &mut self.id)?;
        ser.field("tags", &mut self.tags)?;
        ser.field("name", &mut self.name)?;
        ser.field("history", &mut self.history)?;
        ser.field("index", &mut self.index)
    }
}

fn record() -> impl Strategy<Value = Record> {
    (
        any::<u64>(),
        prop::collection::hash_set(any::<u16>(), 0..8),
        ".{0,24}",
        prop::collection::vec(
            (any::<i32>(), prop::option::of(-1.0e6f32..1.0e6)),
            0..16,
        ),
        prop::collection::btree_map("[a-z]{1,6}", any::<u8>(), 0..6),
    )
        .prop_map(|(id, tags, name, history, index)| Record {
            id,
            tags,
            name,
            history,
            index,
        })
}

fn serializer() -> Serializer {
    Serializer::new(Arc::new(SerializableRegistry::new()))
}

proptest! {
    #[test]
    fn pack_fills_exactly_the_sized_buffer(mut value in record()) {
        let mut ser = serializer();
        ser.start_sizing();
        ser.visit(&mut value).unwrap();
        let size = ser.size();

        ser.start_packing(size);
        prop_assert!(ser.visit(&mut value).is_ok());
        prop_assert_eq!(ser.size(), size);
        prop_assert_eq!(ser.finish_packing().unwrap().len(), size);
    }

    #[test]
    fn unpack_restores_what_pack_wrote(mut value in record()) {
        let mut ser = serializer();
        ser.start_sizing();
        ser.visit(&mut value).unwrap();
        ser.start_packing(ser.size());
        ser.visit(&mut value).unwrap();
        let bytes = ser.finish_packing().unwrap();

        let mut restored = Record::default();
        ser.start_unpacking(bytes);
        ser.visit(&mut restored).unwrap();
        prop_assert_eq!(ser.remaining(), 0);
        prop_assert_eq!(restored, value);
    }

    #[test]
    fn short_buffers_always_overrun(mut value in record(), shortfall in 1usize..8) {
        let mut ser = serializer();
        ser.start_sizing();
        ser.visit(&mut value).unwrap();
        let size = ser.size();

        ser.start_packing(size.saturating_sub(shortfall));
        let overran = matches!(
            ser.visit(&mut value),
            Err(SerializationError::BufferOverrun { .. })
        );
        prop_assert!(overran);
    }
}
