use crate::vae_error::{Result, VaeError};
use candle_core::Tensor;
use std::fmt;

///
/// Shape contract of a layer's input or output. A `Sequence` space
/// adds a time axis right after the batch axis.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Space {
    /// (batch, dim)
    Vector { dim: usize },
    /// (batch, dim) integer labels in `[0, max_labels)`
    Index { dim: usize, max_labels: usize },
    /// (batch, time, ...inner)
    Sequence(Box<Space>),
}

impl Space {
    pub fn sequence(inner: Space) -> Self {
        Space::Sequence(Box::new(inner))
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, Space::Sequence(_))
    }

    /// trailing dimension of a single (per-step) example
    pub fn dim(&self) -> usize {
        match self {
            Space::Vector { dim } => *dim,
            Space::Index { dim, .. } => *dim,
            Space::Sequence(inner) => inner.dim(),
        }
    }

    /// Check that `x` has the layout this space describes
    pub fn validate(&self, x: &Tensor) -> Result<()> {
        let dims = x.dims();
        let ok = match self {
            Space::Vector { dim } | Space::Index { dim, .. } => {
                dims.len() == 2 && dims[1] == *dim
            }
            Space::Sequence(inner) => match inner.as_ref() {
                Space::Sequence(_) => dims.len() >= 4,
                _ => dims.len() == 3 && dims[2] == inner.dim(),
            },
        };
        if ok {
            Ok(())
        } else {
            Err(VaeError::InvalidShape {
                expected: self.to_string(),
                got: dims.to_vec(),
            })
        }
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Space::Vector { dim } => write!(f, "VectorSpace(dim={})", dim),
            Space::Index { dim, max_labels } => {
                write!(f, "IndexSpace(dim={}, max_labels={})", dim, max_labels)
            }
            Space::Sequence(inner) => write!(f, "SequenceSpace({})", inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn validate_vector_and_sequence() -> anyhow::Result<()> {
        let x = Tensor::zeros((4, 3), DType::F32, &Device::Cpu)?;
        let xs = Tensor::zeros((4, 7, 3), DType::F32, &Device::Cpu)?;

        let vs = Space::Vector { dim: 3 };
        assert!(vs.validate(&x).is_ok());
        assert!(vs.validate(&xs).is_err());

        let ss = Space::sequence(vs.clone());
        assert!(ss.validate(&xs).is_ok());
        assert!(ss.validate(&x).is_err());
        assert_eq!(ss.dim(), 3);
        assert_eq!(ss.to_string(), "SequenceSpace(VectorSpace(dim=3))");
        Ok(())
    }
}
