//! Field partition of the global unknowns.
//!
//! A `FieldPartition` is an ordered list of disjoint `IndexSet`s, one per physical field,
//! whose union covers `0..total` exactly once. It is fixed for the lifetime of a block
//! preconditioner and drives every submatrix extraction and sub-vector gather/scatter.

use crate::error::KError;

/// Ordered, duplicate-free list of global indices belonging to one field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexSet {
    indices: Vec<usize>,
}

impl IndexSet {
    pub fn new(indices: Vec<usize>) -> Result<Self, KError> {
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        if sorted.windows(2).any(|w| w[0] == w[1]) {
            return Err(KError::InvalidPartition(
                "index set contains duplicate indices".into(),
            ));
        }
        Ok(Self { indices })
    }

    /// Contiguous set `start..start + len`.
    pub fn range(start: usize, len: usize) -> Self {
        Self {
            indices: (start..start + len).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Sorted union of two sets.
    pub fn union(&self, other: &IndexSet) -> IndexSet {
        let mut indices: Vec<usize> = self.indices.iter().chain(&other.indices).copied().collect();
        indices.sort_unstable();
        indices.dedup();
        IndexSet { indices }
    }

    /// out[k] = x[self[k]]
    pub fn gather(&self, x: &[f64], out: &mut [f64]) {
        assert_eq!(out.len(), self.len(), "gather: output has incorrect length");
        for (o, &i) in out.iter_mut().zip(&self.indices) {
            *o = x[i];
        }
    }

    /// y[self[k]] = src[k]
    pub fn scatter(&self, src: &[f64], y: &mut [f64]) {
        assert_eq!(src.len(), self.len(), "scatter: source has incorrect length");
        for (&s, &i) in src.iter().zip(&self.indices) {
            y[i] = s;
        }
    }

    /// Positions of this set's indices inside `within`, in this set's order.
    pub fn relative_to(&self, within: &IndexSet) -> Result<IndexSet, KError> {
        let max = within.indices.iter().copied().max().map_or(0, |m| m + 1);
        let mut position = vec![usize::MAX; max];
        for (k, &i) in within.indices.iter().enumerate() {
            position[i] = k;
        }
        let indices = self
            .indices
            .iter()
            .map(|&i| match position.get(i) {
                Some(&k) if k != usize::MAX => Ok(k),
                _ => Err(KError::InvalidPartition(format!(
                    "index {} is not contained in the enclosing set",
                    i
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(IndexSet { indices })
    }
}

/// Ordered list of disjoint index sets covering `0..total`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPartition {
    total: usize,
    fields: Vec<IndexSet>,
}

impl FieldPartition {
    pub fn new(total: usize, fields: Vec<IndexSet>) -> Result<Self, KError> {
        let mut owner = vec![usize::MAX; total];
        for (f, set) in fields.iter().enumerate() {
            for &i in set.indices() {
                if i >= total {
                    return Err(KError::InvalidPartition(format!(
                        "field {} has index {} outside 0..{}",
                        f, i, total
                    )));
                }
                if owner[i] != usize::MAX {
                    return Err(KError::InvalidPartition(format!(
                        "index {} belongs to fields {} and {}",
                        i, owner[i], f
                    )));
                }
                owner[i] = f;
            }
        }
        if let Some(gap) = owner.iter().position(|&o| o == usize::MAX) {
            return Err(KError::InvalidPartition(format!(
                "index {} is not covered by any field",
                gap
            )));
        }
        Ok(Self { total, fields })
    }

    /// Contiguous fields of the given sizes, in order.
    pub fn from_sizes(sizes: &[usize]) -> Self {
        let mut start = 0;
        let fields = sizes
            .iter()
            .map(|&n| {
                let set = IndexSet::range(start, n);
                start += n;
                set
            })
            .collect();
        Self { total: start, fields }
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Total number of unknowns.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn field(&self, i: usize) -> &IndexSet {
        &self.fields[i]
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.fields.iter().map(IndexSet::len).collect()
    }

    /// Fails with a configuration error unless the partition has exactly `expected` fields.
    pub fn require(&self, scheme: &'static str, expected: usize) -> Result<(), KError> {
        if self.fields.len() != expected {
            return Err(KError::FieldCountMismatch {
                scheme,
                expected,
                found: self.fields.len(),
            });
        }
        Ok(())
    }

    /// Sorted union of the listed fields.
    pub fn union_of(&self, fields: &[usize]) -> IndexSet {
        fields.iter().fold(IndexSet { indices: Vec::new() }, |acc, &f| {
            acc.union(&self.fields[f])
        })
    }

    /// Composite set of the listed fields together with their partition in the composite's
    /// local numbering.
    pub fn restrict(&self, fields: &[usize]) -> Result<(IndexSet, FieldPartition), KError> {
        let composite = self.union_of(fields);
        let local = fields
            .iter()
            .map(|&f| self.fields[f].relative_to(&composite))
            .collect::<Result<Vec<_>, _>>()?;
        let partition = FieldPartition::new(composite.len(), local)?;
        Ok((composite, partition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overlap_and_gaps() {
        let a = IndexSet::new(vec![0, 2]).unwrap();
        let b = IndexSet::new(vec![2, 3]).unwrap();
        assert!(FieldPartition::new(4, vec![a.clone(), b]).is_err());
        let c = IndexSet::new(vec![3]).unwrap();
        let err = FieldPartition::new(4, vec![a, c]).unwrap_err();
        assert!(matches!(err, KError::InvalidPartition(_)));
        assert!(IndexSet::new(vec![1, 1]).is_err());
    }

    #[test]
    fn interleaved_fields() {
        let u = IndexSet::new(vec![0, 2, 4]).unwrap();
        let p = IndexSet::new(vec![1, 3]).unwrap();
        let part = FieldPartition::new(5, vec![u, p]).unwrap();
        assert_eq!(part.sizes(), vec![3, 2]);
        let x = vec![10.0, 11.0, 12.0, 13.0, 14.0];
        let mut xp = vec![0.0; 2];
        part.field(1).gather(&x, &mut xp);
        assert_eq!(xp, vec![11.0, 13.0]);
        let mut y = vec![0.0; 5];
        part.field(1).scatter(&xp, &mut y);
        assert_eq!(y, vec![0.0, 11.0, 0.0, 13.0, 0.0]);
    }

    #[test]
    fn restrict_renumbers_locally() {
        let part = FieldPartition::new(
            6,
            vec![
                IndexSet::new(vec![0, 3]).unwrap(),
                IndexSet::new(vec![1, 4]).unwrap(),
                IndexSet::new(vec![5]).unwrap(),
                IndexSet::new(vec![2]).unwrap(),
            ],
        )
        .unwrap();
        let (composite, local) = part.restrict(&[0, 1, 2]).unwrap();
        assert_eq!(composite.indices(), &[0, 1, 3, 4, 5]);
        assert_eq!(local.field(0).indices(), &[0, 2]);
        assert_eq!(local.field(1).indices(), &[1, 3]);
        assert_eq!(local.field(2).indices(), &[4]);
        assert_eq!(local.total(), 5);
    }

    #[test]
    fn field_count_check() {
        let part = FieldPartition::from_sizes(&[2, 2]);
        assert!(part.require("schur2x2", 2).is_ok());
        let err = part.require("schur3x3", 3).unwrap_err();
        assert_eq!(
            err,
            KError::FieldCountMismatch {
                scheme: "schur3x3",
                expected: 3,
                found: 2
            }
        );
        assert!(err.is_config());
    }
}
