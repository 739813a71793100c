//! §8 scenario 5: the write-through insertion log and the flushed backing
//! store must agree, both before and after an explicit `flush`.

use barrelidx::btree::BTreeIndex;
use barrelidx::core::types::{DocId, TypedKey};

#[test]
fn get_and_range_agree_before_and_after_flush() {
    let index = BTreeIndex::new(1_000);

    index.add(TypedKey::I32(5), DocId(1));
    index.add(TypedKey::I32(5), DocId(2));
    index.remove(TypedKey::I32(5), DocId(1));

    let mut before: Vec<u32> = index.get(&TypedKey::I32(5)).iter().collect();
    before.sort_unstable();
    assert_eq!(before, vec![2]);

    index.flush();

    let mut after: Vec<u32> = index.get(&TypedKey::I32(5)).iter().collect();
    after.sort_unstable();
    assert_eq!(after, vec![2]);

    let mut ranged: Vec<u32> = index.range(&TypedKey::I32(3), &TypedKey::I32(7)).iter().collect();
    ranged.sort_unstable();
    assert_eq!(ranged, vec![2]);
}
