//! In-memory extendible hash table. The buffer pool uses one as its
//! page directory, mapping page ids to frame slots.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, BuildHasherDefault, Hash, Hasher};
use std::sync::Mutex;

struct Bucket<K, V> {
    local_depth: u32,
    /// Directory index this bucket was first installed at. Aliasing
    /// slots store the same id until a split separates them.
    id: usize,
    entries: BTreeMap<K, V>,
}

struct Directory<K, V> {
    global_depth: u32,
    /// One bucket id per directory slot; length is `2^global_depth`.
    slots: Vec<usize>,
    buckets: HashMap<usize, Bucket<K, V>>,
}

impl<K: Ord, V> Directory<K, V> {
    fn initial() -> Self {
        let mut buckets = HashMap::new();
        for id in 0..2 {
            buckets.insert(
                id,
                Bucket {
                    local_depth: 1,
                    id,
                    entries: BTreeMap::new(),
                },
            );
        }
        Directory {
            global_depth: 1,
            slots: vec![0, 1],
            buckets,
        }
    }
}

fn dir_index(hash: u64, global_depth: u32) -> usize {
    (hash & ((1u64 << global_depth) - 1)) as usize
}

/// Extendible hash table with bucket-level local depths and a doubling
/// directory. All public operations serialise on one internal mutex.
///
/// The hasher is a type parameter so tests can pin the key-to-slot
/// mapping; the default builder is seed-free, keeping `hash_key`
/// deterministic across runs.
pub struct ExtendibleHashTable<K, V, H = BuildHasherDefault<DefaultHasher>> {
    bucket_data_size: usize,
    hash_builder: H,
    dir: Mutex<Directory<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Ord + Copy,
    V: Copy,
{
    pub fn new(bucket_data_size: usize) -> Self {
        Self::with_hasher(bucket_data_size, BuildHasherDefault::default())
    }
}

impl<K, V, H> ExtendibleHashTable<K, V, H>
where
    K: Hash + Ord + Copy,
    V: Copy,
    H: BuildHasher,
{
    pub fn with_hasher(bucket_data_size: usize, hash_builder: H) -> Self {
        assert!(bucket_data_size > 0);
        ExtendibleHashTable {
            bucket_data_size,
            hash_builder,
            dir: Mutex::new(Directory::initial()),
        }
    }

    pub fn hash_key(&self, key: &K) -> u64 {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    pub fn global_depth(&self) -> u32 {
        self.dir.lock().unwrap().global_depth
    }

    /// Local depth of the bucket resident at directory slot
    /// `bucket_id`, or `None` when the slot is out of range or the
    /// bucket holds no entries.
    pub fn local_depth(&self, bucket_id: usize) -> Option<u32> {
        let dir = self.dir.lock().unwrap();
        if bucket_id >= dir.slots.len() {
            return None;
        }
        let bucket = &dir.buckets[&dir.slots[bucket_id]];
        if bucket.entries.is_empty() {
            return None;
        }
        Some(bucket.local_depth)
    }

    /// Number of distinct non-empty buckets. Each bucket is counted at
    /// the one slot whose index equals its id, so aliases do not double
    /// count.
    pub fn num_buckets(&self) -> usize {
        let dir = self.dir.lock().unwrap();
        dir.slots
            .iter()
            .enumerate()
            .filter(|(slot, id)| {
                let bucket = &dir.buckets[*id];
                bucket.id == *slot && !bucket.entries.is_empty()
            })
            .count()
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let dir = self.dir.lock().unwrap();
        let index = dir_index(self.hash_key(key), dir.global_depth);
        dir.buckets[&dir.slots[index]].entries.get(key).copied()
    }

    pub fn remove(&self, key: &K) -> bool {
        let mut dir = self.dir.lock().unwrap();
        let index = dir_index(self.hash_key(key), dir.global_depth);
        let bucket_id = dir.slots[index];
        dir.buckets
            .get_mut(&bucket_id)
            .unwrap()
            .entries
            .remove(key)
            .is_some()
    }

    /// Insert or overwrite. A full target bucket is split (repeatedly,
    /// when every resident key still collides under the deeper
    /// directory) until the key's slot has room.
    pub fn insert(&self, key: K, value: V) {
        let mut dir = self.dir.lock().unwrap();
        let hash = self.hash_key(&key);
        loop {
            let index = dir_index(hash, dir.global_depth);
            let bucket_id = dir.slots[index];
            if dir.buckets[&bucket_id].entries.len() < self.bucket_data_size {
                dir.buckets
                    .get_mut(&bucket_id)
                    .unwrap()
                    .entries
                    .insert(key, value);
                return;
            }
            self.split(&mut dir, index);
        }
    }

    fn split(&self, dir: &mut Directory<K, V>, index: usize) {
        let bucket_id = dir.slots[index];
        if dir.buckets[&bucket_id].local_depth == dir.global_depth {
            // Double the directory: the upper half mirrors the lower
            // half, and the depth bump lands in the same critical
            // section.
            let len = dir.slots.len();
            for i in 0..len {
                let alias = dir.slots[i];
                dir.slots.push(alias);
            }
            dir.global_depth += 1;
        }
        let half = dir.slots.len() / 2;
        let bucket = dir.buckets.get_mut(&bucket_id).unwrap();
        bucket.local_depth += 1;
        let sibling_depth = bucket.local_depth;
        let drained = std::mem::take(&mut bucket.entries);

        let new_id = bucket_id + half;
        dir.slots[new_id] = new_id;
        dir.buckets.insert(
            new_id,
            Bucket {
                local_depth: sibling_depth,
                id: new_id,
                entries: BTreeMap::new(),
            },
        );

        // Redistribute under the deeper directory. Entries that still
        // route to this bucket go straight back; the rest land at their
        // new slot, which gets its own bucket if it is still an alias.
        let global_depth = dir.global_depth;
        for (key, value) in drained {
            let target = dir_index(self.hash_key(&key), global_depth);
            if target == bucket_id {
                dir.buckets
                    .get_mut(&bucket_id)
                    .unwrap()
                    .entries
                    .insert(key, value);
                continue;
            }
            if dir.slots[target] != target {
                dir.slots[target] = target;
                dir.buckets.insert(
                    target,
                    Bucket {
                        local_depth: sibling_depth,
                        id: target,
                        entries: BTreeMap::new(),
                    },
                );
            }
            dir.buckets
                .get_mut(&target)
                .unwrap()
                .entries
                .insert(key, value);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    /// Passes the low bits of the key through untouched, so tests can
    /// steer keys into specific directory slots.
    #[derive(Default)]
    struct IdentityHasher(u64);

    impl Hasher for IdentityHasher {
        fn finish(&self) -> u64 {
            self.0
        }

        fn write(&mut self, bytes: &[u8]) {
            let mut buf = [0u8; 8];
            let n = bytes.len().min(8);
            buf[..n].copy_from_slice(&bytes[..n]);
            self.0 = u64::from_le_bytes(buf);
        }
    }

    type IdentityBuild = BuildHasherDefault<IdentityHasher>;

    fn identity_table(bucket_size: usize) -> ExtendibleHashTable<u64, u64, IdentityBuild> {
        ExtendibleHashTable::with_hasher(bucket_size, IdentityBuild::default())
    }

    #[test]
    fn fresh_table_shape() {
        let table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(4);
        assert_eq!(table.global_depth(), 1);
        assert_eq!(table.num_buckets(), 0);
        assert_eq!(table.local_depth(0), None);
        assert_eq!(table.local_depth(100), None);
        assert_eq!(table.find(&7), None);
    }

    #[test]
    fn insert_find_remove_round_trip() {
        let table: ExtendibleHashTable<i32, i32> = ExtendibleHashTable::new(4);
        for i in 0..200 {
            table.insert(i, i * 10);
        }
        for i in 0..200 {
            assert_eq!(table.find(&i), Some(i * 10));
        }
        // overwrite keeps a single entry per key
        table.insert(42, 7);
        assert_eq!(table.find(&42), Some(7));
        for i in 0..200 {
            assert!(table.remove(&i));
            assert_eq!(table.find(&i), None);
        }
        assert!(!table.remove(&0));
    }

    #[test]
    fn split_deepens_directory() {
        let table = identity_table(2);
        for key in [0b00u64, 0b10, 0b01, 0b11, 0b100] {
            table.insert(key, key + 1);
        }
        assert!(table.global_depth() >= 2);
        assert!(table.num_buckets() >= 3);
        for key in [0b00u64, 0b10, 0b01, 0b11, 0b100] {
            assert_eq!(table.find(&key), Some(key + 1));
        }
        // one more collider on slot 0 forces a second doubling
        table.insert(0b1000, 9);
        assert!(table.global_depth() >= 3);
        assert!(table.num_buckets() >= 4);
        assert_eq!(table.find(&0b1000), Some(9));
        assert_eq!(table.find(&0b100), Some(5));
    }

    #[test]
    fn iterative_split_separates_deep_colliders() {
        // 0, 16 and 32 agree on the low four bits; the directory has to
        // reach depth five before 16 parts ways with the others.
        let table = identity_table(2);
        table.insert(0, 0);
        table.insert(16, 1);
        table.insert(32, 2);
        assert_eq!(table.global_depth(), 5);
        assert_eq!(table.find(&0), Some(0));
        assert_eq!(table.find(&16), Some(1));
        assert_eq!(table.find(&32), Some(2));
    }

    #[test]
    fn local_depths_track_splits() {
        let table = identity_table(2);
        for key in 0..8u64 {
            table.insert(key, key);
        }
        let depth = table.global_depth();
        assert!(depth >= 2);
        for slot in 0..(1usize << depth) {
            if let Some(local) = table.local_depth(slot) {
                assert!(local >= 1 && local <= depth);
            }
        }
        assert_eq!(table.local_depth(1 << depth), None);
    }

    #[test]
    fn concurrent_inserts_are_all_found() {
        let table: Arc<ExtendibleHashTable<i32, i32>> = Arc::new(ExtendibleHashTable::new(8));
        let mut handles = Vec::new();
        for t in 0..4 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                for i in 0..250 {
                    let key = t * 1000 + i;
                    table.insert(key, key + 1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        for t in 0..4 {
            for i in 0..250 {
                let key = t * 1000 + i;
                assert_eq!(table.find(&key), Some(key + 1));
            }
        }
    }
}
