//! Scratch vector with dense storage and a nonzero-position index.
//!
//! A single instance is reused by the engine for row expansion and for
//! substitution passes; callers clear or resize it before use.

use crate::rational::Rational;
use num_traits::Zero;

/// Dense vector of rationals plus the list of positions that may hold
/// a nonzero value. Iteration visits positions in insertion order.
#[derive(Debug, Clone, Default)]
pub struct IndexedVector {
    data: Vec<Rational>,
    index: Vec<usize>,
}

impl IndexedVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero out all tracked positions and forget them.
    pub fn clear(&mut self) {
        for &i in &self.index {
            self.data[i].set_zero();
        }
        self.index.clear();
    }

    /// Grow the dense storage so position `n - 1` is addressable.
    /// Never shrinks.
    pub fn resize(&mut self, n: usize) {
        if n > self.data.len() {
            self.data.resize(n, Rational::zero());
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.iter().all(|&i| self.data[i].is_zero())
    }

    pub fn get(&self, j: usize) -> &Rational {
        &self.data[j]
    }

    /// Set position `j`, which must currently be zero.
    pub fn set_value(&mut self, j: usize, v: Rational) {
        debug_assert!(self.data[j].is_zero());
        if !v.is_zero() {
            self.data[j] = v;
            self.index.push(j);
        }
    }

    /// Add `delta` at position `j`, maintaining the nonzero index.
    pub fn add_value(&mut self, j: usize, delta: Rational) {
        if delta.is_zero() {
            return;
        }
        let was_zero = self.data[j].is_zero();
        self.data[j] += delta;
        if was_zero {
            self.index.push(j);
        } else if self.data[j].is_zero() {
            self.index.retain(|&k| k != j);
        }
    }

    /// Zero position `j` and drop it from the index.
    pub fn erase(&mut self, j: usize) {
        if !self.data[j].is_zero() {
            self.data[j].set_zero();
        }
        self.index.retain(|&k| k != j);
    }

    /// Nonzero entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Rational)> + '_ {
        self.index
            .iter()
            .map(|&i| (i, &self.data[i]))
            .filter(|(_, v)| !v.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    fn rat(n: i64) -> Rational {
        Rational::from_integer(BigInt::from(n))
    }

    #[test]
    fn add_and_cancel() {
        let mut v = IndexedVector::new();
        v.resize(4);
        v.set_value(1, rat(3));
        v.add_value(1, rat(-3));
        assert!(v.get(1).is_zero());
        assert_eq!(v.iter().count(), 0);

        v.add_value(2, rat(5));
        v.add_value(0, rat(-1));
        let got: Vec<_> = v.iter().map(|(i, q)| (i, q.clone())).collect();
        assert_eq!(got, vec![(2, rat(5)), (0, rat(-1))]);

        v.clear();
        assert_eq!(v.iter().count(), 0);
        assert!(v.get(2).is_zero());
    }
}
