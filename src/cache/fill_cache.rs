use std::collections::hash_map::Entry;
use std::hash::Hash;

use fnv::FnvHashMap;

use crate::fmt::format_size;

/// Returns the allocated memory in bytes.
pub trait ByteSize {
    /// Returns the amount of allocated memory in bytes.
    ///
    /// Note that most probably this is an approximation and not the exact byte value. However,
    /// it should represent the "largest" part of an instance. (E.g. for a string, this would
    /// be the bytes allocated on the heap and might discard the fields allocated on the stack
    /// used to store the length and capacity as well as the pointer itself.
    fn allocated_size(&self) -> usize;
}

impl ByteSize for String {
    fn allocated_size(&self) -> usize {
        self.capacity()
    }
}

impl ByteSize for usize {
    fn allocated_size(&self) -> usize {
        0
    }
}

impl ByteSize for u64 {
    fn allocated_size(&self) -> usize {
        0
    }
}

impl ByteSize for Vec<u8> {
    fn allocated_size(&self) -> usize {
        self.capacity()
    }
}

impl ByteSize for bytes::Bytes {
    fn allocated_size(&self) -> usize {
        self.len()
    }
}

impl<T: ByteSize> ByteSize for Option<T> {
    fn allocated_size(&self) -> usize {
        match self {
            Some(value) => value.allocated_size(),
            None => 0,
        }
    }
}

/// Provides a fill-on-miss cache with an advisory size budget.
///
/// A fill cache behaves like a **Map** whose entries are created lazily: when a key is looked
/// up for the first time, the caller supplied producer is invoked, its result is stored and
/// returned. Every further lookup for the same key replays the stored value - the producer is
/// never invoked again for a key which is present. There is no way to update or invalidate a
/// single entry; the only transition back to "absent" is [teardown](FillCache::teardown), which
/// clears the whole cache if (and only if) cleanup was requested at construction.
///
/// Note that a stored value which is itself empty (an empty string, an empty vector, **None**)
/// is a perfectly normal entry. Only the strict absence of a key causes the producer to run,
/// so value types are free to use their own notion of emptiness without being re-produced over
/// and over.
///
/// The byte budget handed to [new](FillCache::new) is advisory. The cache tracks the
/// (approximate) allocated memory of its keys and values and logs a warning once the budget is
/// exceeded, but it never evicts - the actual memory use may grow somewhat above the limit.
///
/// All mutating operations take `&mut self`, so a cache instance is owned by a single caller.
/// To share one across threads or tasks, wrap it in a `Mutex`.
///
/// # Examples
/// ```
/// # use callisto::cache::FillCache;
/// let mut cache = FillCache::new(1024, false);
/// let mut productions = 0;
///
/// // The first access for a key invokes the producer...
/// assert_eq!(
///     cache.get_or_compute("life".to_owned(), || {
///         productions += 1;
///         "42".to_owned()
///     }),
///     &"42".to_owned()
/// );
///
/// // ...every further access replays the stored value. The (now different) producer
/// // is not invoked:
/// assert_eq!(
///     cache.get_or_compute("life".to_owned(), || {
///         productions += 1;
///         "0".to_owned()
///     }),
///     &"42".to_owned()
/// );
///
/// assert_eq!(productions, 1);
/// ```
pub struct FillCache<K: Eq + Hash + ByteSize, V: ByteSize> {
    map: FnvHashMap<K, V>,
    max_memory: usize,
    cleanup: bool,
    allocated_memory: usize,
    budget_warned: bool,
    reads: usize,
    hits: usize,
}

impl<K: Eq + Hash + ByteSize, V: ByteSize> FillCache<K, V> {
    /// Creates a new, empty cache with the given advisory byte budget.
    ///
    /// **max_memory** bounds the memory the entries are expected to allocate. The bound is not
    /// enforced (nothing is ever evicted) - once it is crossed, a warning is logged and the
    /// cache keeps filling. A budget of 0 is accepted and simply means that the warning fires
    /// on the first insertion.
    ///
    /// **cleanup** determines what [teardown](FillCache::teardown) does: if **true**, tearing
    /// the cache down clears all entries; if **false**, teardown is a no-op and the entries
    /// survive for re-use in a later session.
    pub fn new(max_memory: usize, cleanup: bool) -> Self {
        FillCache {
            map: FnvHashMap::default(),
            max_memory,
            cleanup,
            allocated_memory: 0,
            budget_warned: false,
            reads: 0,
            hits: 0,
        }
    }

    /// Returns the value stored for the given key, producing it first if it is absent.
    ///
    /// If the key is present, the stored value is returned and the producer is **not**
    /// invoked. Otherwise the producer is invoked exactly once, its result is stored under
    /// the key and returned. Therefore, for a fixed key, the producer runs at most once per
    /// cache lifetime.
    ///
    /// # Examples
    /// ```
    /// # use callisto::cache::FillCache;
    /// let mut cache = FillCache::new(1024, false);
    ///
    /// assert_eq!(cache.get_or_compute("answer".to_owned(), || 42u64), &42);
    /// assert_eq!(cache.get_or_compute("answer".to_owned(), || 0u64), &42);
    /// assert_eq!(cache.len(), 1);
    /// ```
    pub fn get_or_compute(&mut self, key: K, producer: impl FnOnce() -> V) -> &V {
        self.reads += 1;

        match self.map.entry(key) {
            Entry::Occupied(entry) => {
                self.hits += 1;
                &*entry.into_mut()
            }
            Entry::Vacant(entry) => {
                let value = producer();
                let added = entry.key().allocated_size() + value.allocated_size();
                self.allocated_memory += added;
                if self.allocated_memory > self.max_memory && !self.budget_warned {
                    self.budget_warned = true;
                    log::warn!(
                        "Cache now allocates {} which is above its advisory budget of {}. \
                         Entries are never evicted, so the cache will keep growing...",
                        format_size(self.allocated_memory),
                        format_size(self.max_memory)
                    );
                }

                &*entry.insert(value)
            }
        }
    }

    /// Behaves just like [get_or_compute](FillCache::get_or_compute) for a fallible producer.
    ///
    /// If the producer fails, the error is passed on to the caller and **nothing** is stored:
    /// the key remains absent, so the next call for the same key runs the producer again. A
    /// failed production therefore never poisons the cache.
    ///
    /// # Examples
    /// ```
    /// # use callisto::cache::FillCache;
    /// let mut cache = FillCache::new(1024, false);
    ///
    /// // A failed production leaves the key absent...
    /// let result = cache.try_get_or_compute("answer".to_owned(), || {
    ///     Err(anyhow::anyhow!("not computed yet"))
    /// });
    /// assert_eq!(result.is_err(), true);
    /// assert_eq!(cache.is_empty(), true);
    ///
    /// // ...so the next call simply retries.
    /// let result = cache.try_get_or_compute("answer".to_owned(), || Ok(42u64));
    /// assert_eq!(result.unwrap(), &42);
    /// ```
    pub fn try_get_or_compute(
        &mut self,
        key: K,
        producer: impl FnOnce() -> anyhow::Result<V>,
    ) -> anyhow::Result<&V> {
        self.reads += 1;

        match self.map.entry(key) {
            Entry::Occupied(entry) => {
                self.hits += 1;
                Ok(&*entry.into_mut())
            }
            Entry::Vacant(entry) => {
                let value = producer()?;
                let added = entry.key().allocated_size() + value.allocated_size();
                self.allocated_memory += added;
                if self.allocated_memory > self.max_memory && !self.budget_warned {
                    self.budget_warned = true;
                    log::warn!(
                        "Cache now allocates {} which is above its advisory budget of {}. \
                         Entries are never evicted, so the cache will keep growing...",
                        format_size(self.allocated_memory),
                        format_size(self.max_memory)
                    );
                }

                Ok(&*entry.insert(value))
            }
        }
    }

    /// Behaves just like [try_get_or_compute](FillCache::try_get_or_compute) for an async
    /// producer.
    ///
    /// The cache itself never suspends - any awaiting happens inside the producer, which only
    /// runs if the key is absent. This is the variant the [reader](crate::reader) uses to pull
    /// batches from the (async) scan cursor on a miss.
    pub async fn try_get_or_compute_async<F, Fut>(
        &mut self,
        key: K,
        producer: F,
    ) -> anyhow::Result<&V>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<V>>,
    {
        self.reads += 1;

        match self.map.entry(key) {
            Entry::Occupied(entry) => {
                self.hits += 1;
                Ok(&*entry.into_mut())
            }
            Entry::Vacant(entry) => {
                let value = producer().await?;
                let added = entry.key().allocated_size() + value.allocated_size();
                self.allocated_memory += added;
                if self.allocated_memory > self.max_memory && !self.budget_warned {
                    self.budget_warned = true;
                    log::warn!(
                        "Cache now allocates {} which is above its advisory budget of {}. \
                         Entries are never evicted, so the cache will keep growing...",
                        format_size(self.allocated_memory),
                        format_size(self.max_memory)
                    );
                }

                Ok(&*entry.insert(value))
            }
        }
    }

    /// Tears the cache down at the end of its session.
    ///
    /// If cleanup was requested at construction, this removes all entries, resets the memory
    /// accounting and zeroes all metrics, leaving the cache as if it had just been created.
    /// Otherwise this does nothing at all and every stored entry survives for the next
    /// session. Calling this more than once is harmless in both cases.
    ///
    /// # Examples
    /// ```
    /// # use callisto::cache::FillCache;
    /// // With cleanup enabled, teardown clears the cache...
    /// let mut cache = FillCache::new(1024, true);
    /// let _ = cache.get_or_compute("answer".to_owned(), || 42u64);
    /// cache.teardown();
    /// assert_eq!(cache.is_empty(), true);
    ///
    /// // ...without it, the entries stay around.
    /// let mut cache = FillCache::new(1024, false);
    /// let _ = cache.get_or_compute("answer".to_owned(), || 42u64);
    /// cache.teardown();
    /// assert_eq!(cache.len(), 1);
    /// ```
    pub fn teardown(&mut self) {
        if self.cleanup {
            self.map.clear();
            self.allocated_memory = 0;
            self.budget_warned = false;
            self.reads = 0;
            self.hits = 0;
        }
    }

    /// Returns the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Determines if the cache is completely empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the advisory byte budget of this cache.
    pub fn max_memory(&self) -> usize {
        self.max_memory
    }

    /// Returns the amount of memory allocated by the keys and values of this cache.
    ///
    /// The returned value is in bytes. Note that this is most probably a rough estimate but
    /// should account for the largest part of allocated memory.
    pub fn allocated_memory(&self) -> usize {
        self.allocated_memory
    }

    /// Returns the total number of lookups performed on this cache.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Returns the number of lookups which were answered from a stored entry.
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Returns the cache hit rate in percent.
    pub fn hit_rate(&self) -> f32 {
        match self.reads {
            0 => 0.,
            n => self.hits as f32 / n as f32 * 100.,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::FillCache;

    #[test]
    fn each_key_is_produced_at_most_once() {
        let mut cache = FillCache::new(1024, false);
        let mut productions = 0;

        // Each invocation of the producer yields a distinct value, so replays are
        // distinguishable from re-productions...
        let first = cache
            .get_or_compute("a".to_owned(), || {
                productions += 1;
                format!("value-{}", productions)
            })
            .clone();
        let second = cache
            .get_or_compute("a".to_owned(), || {
                productions += 1;
                format!("value-{}", productions)
            })
            .clone();

        assert_eq!(first, "value-1");
        assert_eq!(second, "value-1");
        assert_eq!(productions, 1);
    }

    #[test]
    fn distinct_keys_are_independent() {
        let mut cache = FillCache::new(1024, false);
        let mut productions_a = 0;
        let mut productions_b = 0;

        assert_eq!(
            cache.get_or_compute("a".to_owned(), || {
                productions_a += 1;
                "A".to_owned()
            }),
            &"A".to_owned()
        );
        assert_eq!(
            cache.get_or_compute("b".to_owned(), || {
                productions_b += 1;
                "B".to_owned()
            }),
            &"B".to_owned()
        );

        // Reading "a" again must not touch the producer of "b" (and vice versa)...
        assert_eq!(
            cache.get_or_compute("a".to_owned(), || {
                productions_a += 1;
                "A2".to_owned()
            }),
            &"A".to_owned()
        );

        assert_eq!(productions_a, 1);
        assert_eq!(productions_b, 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn a_failed_production_does_not_poison_the_cache() {
        let mut cache = FillCache::new(1024, false);
        let mut attempts = 0;

        // The first attempt fails and must not leave any trace in the cache...
        let result = cache.try_get_or_compute("a".to_owned(), || {
            attempts += 1;
            Err(anyhow::anyhow!("remote hiccup"))
        });
        assert_eq!(result.is_err(), true);
        assert_eq!(cache.is_empty(), true);

        // ...therefore the second attempt runs the producer again and succeeds.
        let result = cache.try_get_or_compute("a".to_owned(), || {
            attempts += 1;
            Ok("A".to_owned())
        });
        assert_eq!(result.unwrap(), &"A".to_owned());
        assert_eq!(attempts, 2);

        // From now on, the stored value is replayed without any further attempts...
        let result = cache.try_get_or_compute("a".to_owned(), || {
            attempts += 1;
            Ok("A2".to_owned())
        });
        assert_eq!(result.unwrap(), &"A".to_owned());
        assert_eq!(attempts, 2);
    }

    #[test]
    fn empty_values_count_as_present() {
        let mut cache: FillCache<String, String> = FillCache::new(1024, false);
        let mut productions = 0;

        // An empty string is a perfectly valid value...
        assert_eq!(
            cache.get_or_compute("a".to_owned(), || {
                productions += 1;
                String::new()
            }),
            &String::new()
        );

        // ...which is replayed instead of being re-produced.
        assert_eq!(
            cache.get_or_compute("a".to_owned(), || {
                productions += 1;
                "not empty".to_owned()
            }),
            &String::new()
        );
        assert_eq!(productions, 1);

        // The same holds for None when the value type is an Option...
        let mut cache: FillCache<String, Option<String>> = FillCache::new(1024, false);
        let _ = cache.get_or_compute("end".to_owned(), || None);
        assert_eq!(
            cache.get_or_compute("end".to_owned(), || Some("value".to_owned())),
            &None
        );
    }

    #[test]
    fn teardown_honors_the_cleanup_flag() {
        // Without cleanup, teardown leaves all entries in place...
        let mut cache = FillCache::new(1024, false);
        let _ = cache.get_or_compute("a".to_owned(), || "A".to_owned());
        cache.teardown();
        let mut productions = 0;
        assert_eq!(
            cache.get_or_compute("a".to_owned(), || {
                productions += 1;
                "A2".to_owned()
            }),
            &"A".to_owned()
        );
        assert_eq!(productions, 0);

        // With cleanup, teardown resets the cache to empty, so the producer runs again...
        let mut cache = FillCache::new(1024, true);
        let _ = cache.get_or_compute("a".to_owned(), || "A".to_owned());
        cache.teardown();
        assert_eq!(cache.is_empty(), true);
        assert_eq!(
            cache.get_or_compute("a".to_owned(), || {
                productions += 1;
                "A2".to_owned()
            }),
            &"A2".to_owned()
        );
        assert_eq!(productions, 1);

        // Teardown is idempotent in both branches...
        cache.teardown();
        cache.teardown();
        assert_eq!(cache.is_empty(), true);
    }

    #[test]
    fn memory_accounting_tracks_keys_and_values() {
        let mut cache = FillCache::new(8, false);

        // 1 byte of key plus 4 bytes of value...
        let _ = cache.get_or_compute("a".to_owned(), || "1234".to_owned());
        assert_eq!(cache.allocated_memory(), 5);

        // ...plus another 1 + 4. The budget of 8 is now exceeded, which is merely
        // logged - both entries stay.
        let _ = cache.get_or_compute("b".to_owned(), || "5678".to_owned());
        assert_eq!(cache.allocated_memory(), 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.max_memory(), 8);
    }

    #[test]
    fn metrics_are_computed_correctly() {
        let mut cache = FillCache::new(1024, true);

        let _ = cache.get_or_compute("a".to_owned(), || "A".to_owned());
        let _ = cache.get_or_compute("a".to_owned(), || "A".to_owned());
        let _ = cache.get_or_compute("a".to_owned(), || "A".to_owned());
        let _ = cache.get_or_compute("b".to_owned(), || "B".to_owned());

        // 4 reads of which 2 were answered from the stored entry for "a"...
        assert_eq!(cache.reads(), 4);
        assert_eq!(cache.hits(), 2);
        assert_eq!(cache.hit_rate().round() as i32, 50);

        // Teardown with cleanup also resets the metrics...
        cache.teardown();
        assert_eq!(cache.reads(), 0);
        assert_eq!(cache.hit_rate().round() as i32, 0);
    }

    #[test]
    fn async_producers_follow_the_same_contract() {
        crate::testing::test_async(async {
            let mut cache: FillCache<u64, Option<String>> = FillCache::new(1024, false);
            let mut productions = 0;

            // The first access awaits the producer...
            let result = cache
                .try_get_or_compute_async(7, || async {
                    productions += 1;
                    Ok(Some("value".to_owned()))
                })
                .await;
            assert_eq!(result.unwrap(), &Some("value".to_owned()));

            // ...all further accesses replay the stored value.
            let result = cache
                .try_get_or_compute_async(7, || async {
                    productions += 1;
                    Ok(None)
                })
                .await;
            assert_eq!(result.unwrap(), &Some("value".to_owned()));
            assert_eq!(productions, 1);

            // A failing async producer leaves the key absent as well...
            let result = cache
                .try_get_or_compute_async(8, || async move { Err(anyhow::anyhow!("remote hiccup")) })
                .await;
            assert_eq!(result.is_err(), true);
            assert_eq!(cache.len(), 1);
        });
    }
}
