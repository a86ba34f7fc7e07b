/// Polynomial rolling hash (base 31, wrapping at 32 bits) over the word's bytes.
pub fn word_hash(word: &str) -> u32 {
    word.bytes()
        .fold(0u32, |hash, b| hash.wrapping_mul(31).wrapping_add(u32::from(b)))
}

/// Reducer that owns `word`. Depends on nothing but the word and the
/// reducer count, so every occurrence of a word meets at the same reducer.
pub fn partition(word: &str, num_reducers: usize) -> usize {
    debug_assert!(num_reducers > 0);
    (u64::from(word_hash(word)) % num_reducers as u64) as usize
}
