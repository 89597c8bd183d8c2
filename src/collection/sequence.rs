//! Restartable lazy key-value sequences.
//!
//! A [`Sequence`] stores a producer rather than items. Every call to
//! [`Sequence::iter`] invokes the producer again, so iterating a second time
//! replays the source from the beginning instead of resuming a shared cursor.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use regex::Regex;
use serde_json::{Map, Value};

use super::SequenceError;

type Pairs<K, V> = Box<dyn Iterator<Item = (K, V)>>;
type Producer<K, V> = Rc<dyn Fn() -> Pairs<K, V>>;

/// Side on which [`Sequence::pad`] inserts padding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Pad {
    Left,
    #[default]
    Right,
}

/// A lazy, restartable sequence of `(key, value)` pairs.
///
/// Combinators take the sequence by value and return a new one that closes
/// over it; nothing is evaluated until the result is iterated. Terminal
/// operations (`reduce`, `count`, `raw`, ...) borrow and may be called
/// repeatedly.
///
/// ```
/// use stratum_fnd::Sequence;
///
/// let evens = Sequence::from_vec(vec![1, 2, 3, 4])
///     .filter(|v, _| v % 2 == 0)
///     .map(|v| v * 10);
///
/// assert_eq!(evens.raw(), vec![(1, 20), (3, 40)]);
/// assert_eq!(evens.raw(), vec![(1, 20), (3, 40)]);
/// ```
pub struct Sequence<K, V> {
    producer: Producer<K, V>,
    restartable: bool,
}

impl<K: 'static, V: 'static> Sequence<K, V> {
    /// Creates a sequence from a factory invoked once per iteration pass.
    pub fn from_factory<F, I>(factory: F) -> Self
    where
        F: Fn() -> I + 'static,
        I: IntoIterator<Item = (K, V)>,
        I::IntoIter: 'static,
    {
        Self {
            producer: Rc::new(move || -> Pairs<K, V> { Box::new(factory().into_iter()) }),
            restartable: true,
        }
    }

    /// Creates a restartable sequence over owned pairs, cloned on each pass.
    pub fn from_pairs(pairs: Vec<(K, V)>) -> Self
    where
        K: Clone,
        V: Clone,
    {
        let pairs = Rc::new(pairs);
        Self::from_factory(move || {
            let pairs = Rc::clone(&pairs);
            (0..pairs.len()).map(move |index| pairs[index].clone())
        })
    }

    /// Wraps a single-pass iterator, such as a directory walk.
    ///
    /// The first iteration drains the iterator; later passes are empty and
    /// [`try_clone`](Self::try_clone) fails with [`SequenceError::Clone`].
    pub fn once<I>(items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        I::IntoIter: 'static,
    {
        let cursor: RefCell<Option<Pairs<K, V>>> = RefCell::new(Some(Box::new(items.into_iter())));
        Self {
            producer: Rc::new(move || match cursor.borrow_mut().take() {
                Some(items) => items,
                None => Box::new(std::iter::empty()),
            }),
            restartable: false,
        }
    }

    /// Concatenates several sequences in order.
    pub fn aggregate(sequences: Vec<Sequence<K, V>>) -> Self {
        let restartable = sequences.iter().all(Sequence::is_restartable);
        let sequences = Rc::new(sequences);
        Self {
            producer: Rc::new(move || -> Pairs<K, V> {
                let sequences = Rc::clone(&sequences);
                Box::new((0..sequences.len()).flat_map(move |index| sequences[index].iter()))
            }),
            restartable,
        }
    }

    /// Starts a fresh iteration pass over the source.
    pub fn iter(&self) -> Pairs<K, V> {
        (self.producer)()
    }

    /// `false` for sequences built on a single-pass source.
    pub fn is_restartable(&self) -> bool {
        self.restartable
    }

    /// Returns an independent handle with its own iteration cursor.
    pub fn try_clone(&self) -> Result<Self, SequenceError> {
        if !self.restartable {
            return Err(SequenceError::Clone);
        }
        Ok(Self {
            producer: Rc::clone(&self.producer),
            restartable: true,
        })
    }

    fn derive<K2: 'static, V2: 'static>(
        self,
        restartable: bool,
        pass: impl Fn(&Self) -> Pairs<K2, V2> + 'static,
    ) -> Sequence<K2, V2> {
        Sequence {
            producer: Rc::new(move || pass(&self)),
            restartable,
        }
    }

    /// Applies `transform` to every value, keeping keys.
    pub fn map<W: 'static, F>(self, transform: F) -> Sequence<K, W>
    where
        F: Fn(V) -> W + 'static,
    {
        let transform = Rc::new(transform);
        let restartable = self.restartable;
        self.derive(restartable, move |source| {
            let transform = Rc::clone(&transform);
            Box::new(source.iter().map(move |(key, value)| (key, transform(value))))
        })
    }

    /// Applies `transform` to every key, keeping values.
    pub fn map_keys<K2: 'static, F>(self, transform: F) -> Sequence<K2, V>
    where
        F: Fn(K) -> K2 + 'static,
    {
        let transform = Rc::new(transform);
        let restartable = self.restartable;
        self.derive(restartable, move |source| {
            let transform = Rc::clone(&transform);
            Box::new(source.iter().map(move |(key, value)| (transform(key), value)))
        })
    }

    /// Keeps the pairs for which `predicate(value, key)` holds.
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&V, &K) -> bool + 'static,
    {
        let predicate = Rc::new(predicate);
        let restartable = self.restartable;
        self.derive(restartable, move |source| {
            let predicate = Rc::clone(&predicate);
            Box::new(source.iter().filter(move |(key, value)| predicate(value, key)))
        })
    }

    /// Folds every value into `initial`, eagerly.
    pub fn reduce<A, F>(&self, combine: F, initial: A) -> A
    where
        F: FnMut(A, V) -> A,
    {
        self.iter().map(|(_, value)| value).fold(initial, combine)
    }

    /// Positional window; a `limit` of `None` keeps the whole tail.
    pub fn slice(self, offset: usize, limit: Option<usize>) -> Self {
        let restartable = self.restartable;
        let limit = limit.unwrap_or(usize::MAX);
        self.derive(restartable, move |source| {
            Box::new(source.iter().skip(offset).take(limit))
        })
    }

    /// Yields `other` after this sequence.
    pub fn append(self, other: Sequence<K, V>) -> Self {
        let restartable = self.restartable && other.restartable;
        self.derive(restartable, move |source| Box::new(source.iter().chain(other.iter())))
    }

    /// Yields `other` before this sequence.
    pub fn prepend(self, other: Sequence<K, V>) -> Self {
        let restartable = self.restartable && other.restartable;
        self.derive(restartable, move |source| Box::new(other.iter().chain(source.iter())))
    }

    /// Zips this sequence's values (as keys) with the values of `values`.
    pub fn combine<K2: 'static, W: 'static>(
        self,
        values: Sequence<K2, W>,
    ) -> Result<Sequence<V, W>, SequenceError> {
        self.zip_with(values, |_, value| value)
    }

    /// Zips this sequence's keys with the values of `values`.
    pub fn combine_keys<K2: 'static, W: 'static>(
        self,
        values: Sequence<K2, W>,
    ) -> Result<Sequence<K, W>, SequenceError> {
        self.zip_with(values, |key, _| key)
    }

    /// Pairs every value with each element of `others`, in order.
    ///
    /// For each element, this sequence is replayed from the start and yields
    /// `(key, (value, element))`, so the result holds `count * elements`
    /// pairs. Single-pass sources fail with [`SequenceError::Clone`].
    pub fn join<K2: 'static, W: Clone + 'static>(
        self,
        others: &[Sequence<K2, W>],
    ) -> Result<Sequence<K, (V, W)>, SequenceError> {
        if !self.restartable {
            return Err(SequenceError::Clone);
        }

        let elements: Rc<Vec<W>> = Rc::new(materialize(others).into_iter().flatten().collect());
        Ok(self.derive(true, move |source| {
            let elements = Rc::clone(&elements);
            let producer = Rc::clone(&source.producer);
            Box::new((0..elements.len()).flat_map(move |index| {
                let element = elements[index].clone();
                producer().map(move |(key, value)| (key, (value, element.clone())))
            }))
        }))
    }

    fn zip_with<K2: 'static, W: 'static, O: 'static>(
        self,
        values: Sequence<K2, W>,
        pick: fn(K, V) -> O,
    ) -> Result<Sequence<O, W>, SequenceError> {
        // Counting consumes a pass, so both sides must be replayable.
        if !self.restartable || !values.restartable {
            return Err(SequenceError::Clone);
        }

        let (left, right) = (self.count(), values.count());
        if left != right {
            return Err(SequenceError::LengthMismatch { left, right });
        }

        Ok(self.derive(true, move |source| {
            Box::new(
                source
                    .iter()
                    .zip(values.iter())
                    .map(move |((key, value), (_, other))| (pick(key, value), other)),
            )
        }))
    }

    /// Groups values by the key returned from `classify`, in first-seen order.
    pub fn group<G, F>(&self, mut classify: F) -> Sequence<G, Vec<V>>
    where
        G: PartialEq + Clone + 'static,
        V: Clone,
        F: FnMut(&V, &K) -> G,
    {
        let mut groups: Vec<(G, Vec<V>)> = Vec::new();
        for (key, value) in self.iter() {
            let group = classify(&value, &key);
            match groups.iter_mut().find(|(existing, _)| *existing == group) {
                Some((_, members)) => members.push(value),
                None => groups.push((group, vec![value])),
            }
        }
        Sequence::from_pairs(groups)
    }

    /// Materializes one full pass.
    pub fn raw(&self) -> Vec<(K, V)> {
        self.iter().collect()
    }

    /// Number of pairs in one full pass.
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// The keys, renumbered from zero.
    pub fn keys(self) -> Sequence<usize, K> {
        let restartable = self.restartable;
        self.derive(restartable, |source| {
            Box::new(source.iter().map(|(key, _)| key).enumerate())
        })
    }

    /// The values, renumbered from zero.
    pub fn values(self) -> Sequence<usize, V> {
        let restartable = self.restartable;
        self.derive(restartable, |source| {
            Box::new(source.iter().map(|(_, value)| value).enumerate())
        })
    }

    /// Swaps keys and values.
    pub fn flip(self) -> Sequence<V, K> {
        let restartable = self.restartable;
        self.derive(restartable, |source| {
            Box::new(source.iter().map(|(key, value)| (value, key)))
        })
    }

    /// Calls `callback(value, key)` for every pair.
    pub fn each<F>(&self, mut callback: F)
    where
        F: FnMut(&V, &K),
    {
        for (key, value) in self.iter() {
            callback(&value, &key);
        }
    }

    /// Calls `callback(value, key)` for the pairs matching `predicate`.
    pub fn when<P, F>(&self, mut predicate: P, mut callback: F) -> &Self
    where
        P: FnMut(&V, &K) -> bool,
        F: FnMut(&V, &K),
    {
        for (key, value) in self.iter() {
            if predicate(&value, &key) {
                callback(&value, &key);
            }
        }
        self
    }

    /// Returns `true` when every pair satisfies `predicate`.
    pub fn validate<F>(&self, mut predicate: F) -> bool
    where
        F: FnMut(&V, &K) -> bool,
    {
        self.iter().all(|(key, value)| predicate(&value, &key))
    }

    /// Orders pairs by value, keeping each value's key.
    pub fn sort<F>(self, compare: F) -> Self
    where
        F: Fn(&V, &V) -> Ordering + 'static,
    {
        let compare = Rc::new(compare);
        let restartable = self.restartable;
        self.derive(restartable, move |source| {
            let mut pairs: Vec<(K, V)> = source.iter().collect();
            pairs.sort_by(|(_, a), (_, b)| compare(a, b));
            Box::new(pairs.into_iter())
        })
    }

    /// Yields the pairs in reverse order; buffers one pass.
    pub fn reverse(self) -> Self {
        let restartable = self.restartable;
        self.derive(restartable, |source| {
            let mut pairs: Vec<(K, V)> = source.iter().collect();
            pairs.reverse();
            Box::new(pairs.into_iter())
        })
    }

    /// Pads the values up to `length` items and renumbers them from zero.
    pub fn pad(self, length: usize, padding: V, side: Pad) -> Sequence<usize, V>
    where
        V: Clone,
    {
        let restartable = self.restartable;
        self.derive(restartable, move |source| {
            let items: Vec<V> = source.iter().map(|(_, value)| value).collect();
            let fill = std::iter::repeat(padding.clone()).take(length.saturating_sub(items.len()));
            let values: Vec<V> = match side {
                Pad::Right => items.into_iter().chain(fill).collect(),
                Pad::Left => fill.chain(items).collect(),
            };
            Box::new(values.into_iter().enumerate())
        })
    }
}

impl<K: 'static, V: PartialEq + Clone + 'static> Sequence<K, V> {
    /// Key of the first value equal to `item`.
    pub fn find(&self, item: &V) -> Option<K> {
        self.iter()
            .find(|(_, value)| value == item)
            .map(|(key, _)| key)
    }

    /// Whether any value equals `item`.
    pub fn contains(&self, item: &V) -> bool {
        self.iter().any(|(_, value)| value == *item)
    }

    /// Drops every value equal to `item`.
    pub fn remove(self, item: V) -> Self {
        self.filter(move |value, _| *value != item)
    }

    /// Yields the first occurrence of each value, keeping its original key.
    pub fn unique(self) -> Self {
        let restartable = self.restartable;
        self.derive(restartable, |source| {
            let mut seen: Vec<V> = Vec::new();
            Box::new(source.iter().filter(move |(_, value)| {
                if seen.contains(value) {
                    return false;
                }
                seen.push(value.clone());
                true
            }))
        })
    }

    /// Keeps values present in every one of `others`.
    pub fn intersect<K2: 'static>(self, others: &[Sequence<K2, V>]) -> Self {
        let others = Rc::new(materialize(others));
        let restartable = self.restartable;
        self.derive(restartable, move |source| {
            let others = Rc::clone(&others);
            Box::new(
                source
                    .iter()
                    .filter(move |(_, value)| others.iter().all(|other| other.contains(value))),
            )
        })
    }

    /// Drops values present in any of `others`.
    pub fn diff<K2: 'static>(self, others: &[Sequence<K2, V>]) -> Self {
        let others = Rc::new(materialize(others));
        let restartable = self.restartable;
        self.derive(restartable, move |source| {
            let others = Rc::clone(&others);
            Box::new(
                source
                    .iter()
                    .filter(move |(_, value)| !others.iter().any(|other| other.contains(value))),
            )
        })
    }
}

fn materialize<K: 'static, V: 'static>(sequences: &[Sequence<K, V>]) -> Vec<Vec<V>> {
    sequences
        .iter()
        .map(|sequence| sequence.iter().map(|(_, value)| value).collect())
        .collect()
}

impl<K: fmt::Display + 'static, V: fmt::Display + 'static> Sequence<K, V> {
    /// Joins the values' text with `separator`.
    pub fn implode(&self, separator: &str) -> String {
        self.iter()
            .map(|(_, value)| value.to_string())
            .collect::<Vec<_>>()
            .join(separator)
    }
}

impl<V: Clone + 'static> Sequence<usize, V> {
    /// Creates a list-like sequence keyed `0..n`.
    pub fn from_vec(values: Vec<V>) -> Self {
        Self::from_pairs(values.into_iter().enumerate().collect())
    }
}

impl Sequence<String, Value> {
    /// Creates a sequence over an object's entries, in order.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self::from_pairs(map.into_iter().collect())
    }
}

impl<K: 'static> Sequence<K, f64> {
    /// Sum of the values; `0.0` when empty.
    pub fn sum(&self) -> f64 {
        self.reduce(|total, value| total + value, 0.0)
    }

    /// Smallest value, `None` when empty.
    pub fn min(&self) -> Option<f64> {
        self.iter().map(|(_, value)| value).reduce(f64::min)
    }

    /// Largest value, `None` when empty.
    pub fn max(&self) -> Option<f64> {
        self.iter().map(|(_, value)| value).reduce(f64::max)
    }

    /// Arithmetic mean, `None` when empty.
    pub fn average(&self) -> Option<f64> {
        match self.count() {
            0 => None,
            count => Some(self.sum() / count as f64),
        }
    }

    /// Middle value of the sorted values; the mean of the two middle values
    /// when the count is even.
    pub fn median(&self) -> Option<f64> {
        let mut values: Vec<f64> = self.iter().map(|(_, value)| value).collect();
        values.sort_by(f64::total_cmp);

        let middle = values.len() / 2;
        match values.len() {
            0 => None,
            len if len % 2 == 0 => Some((values[middle - 1] + values[middle]) / 2.0),
            _ => Some(values[middle]),
        }
    }

    /// Most frequent value; ties go to the value seen first.
    pub fn mode(&self) -> Option<f64> {
        let mut counts: Vec<(f64, usize)> = Vec::new();
        for (_, value) in self.iter() {
            match counts.iter_mut().find(|(seen, _)| *seen == value) {
                Some((_, count)) => *count += 1,
                None => counts.push((value, 1)),
            }
        }

        let mut best: Option<(f64, usize)> = None;
        for (value, count) in counts {
            if best.map_or(true, |(_, top)| count > top) {
                best = Some((value, count));
            }
        }
        best.map(|(value, _)| value)
    }
}

impl<K: 'static> Sequence<K, String> {
    pub fn lowercase(self) -> Self {
        self.map(|value| value.to_lowercase())
    }

    pub fn uppercase(self) -> Self {
        self.map(|value| value.to_uppercase())
    }

    /// Uppercases the first letter of every whitespace-separated word.
    pub fn title_case(self) -> Self {
        self.map(|value| title_case(&value))
    }

    /// Whether each value matches `pattern`, keeping keys.
    pub fn matches(self, pattern: Regex) -> Sequence<K, bool> {
        self.map(move |value| pattern.is_match(&value))
    }

    /// Keeps the values matching `pattern`.
    pub fn filter_matching(self, pattern: Regex) -> Self {
        self.filter(move |value, _| pattern.is_match(value))
    }
}

impl<V: 'static> Sequence<String, V> {
    pub fn lowercase_keys(self) -> Self {
        self.map_keys(|key| key.to_lowercase())
    }

    pub fn uppercase_keys(self) -> Self {
        self.map_keys(|key| key.to_uppercase())
    }

    pub fn title_case_keys(self) -> Self {
        self.map_keys(|key| title_case(&key))
    }

    /// Keeps the pairs whose key matches `pattern`.
    pub fn filter_matching_keys(self, pattern: Regex) -> Self {
        self.filter(move |_, key| pattern.is_match(key))
    }
}

fn title_case(text: &str) -> String {
    let mut titled = String::with_capacity(text.len());
    let mut at_boundary = true;
    for c in text.chars() {
        if at_boundary {
            titled.extend(c.to_uppercase());
        } else {
            titled.push(c);
        }
        at_boundary = c.is_whitespace();
    }
    titled
}

impl<K, V> Sequence<K, V>
where
    K: fmt::Display + 'static,
    V: Into<Value> + 'static,
{
    /// Materializes into a [`Value`], unwrapping nested sequences.
    ///
    /// Keys numbered `0..n` produce an array; anything else produces an object.
    pub fn to_value(&self) -> Value {
        let pairs: Vec<(String, Value)> = self
            .iter()
            .map(|(key, value)| (key.to_string(), value.into()))
            .collect();

        let is_list = pairs
            .iter()
            .enumerate()
            .all(|(index, (key, _))| *key == index.to_string());

        if is_list {
            Value::Array(pairs.into_iter().map(|(_, value)| value).collect())
        } else {
            Value::Object(pairs.into_iter().collect())
        }
    }
}

impl<K, V> From<Sequence<K, V>> for Value
where
    K: fmt::Display + 'static,
    V: Into<Value> + 'static,
{
    fn from(sequence: Sequence<K, V>) -> Self {
        sequence.to_value()
    }
}

impl<'a, K: 'static, V: 'static> IntoIterator for &'a Sequence<K, V> {
    type Item = (K, V);
    type IntoIter = Pairs<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V> fmt::Debug for Sequence<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("restartable", &self.restartable)
            .finish_non_exhaustive()
    }
}
