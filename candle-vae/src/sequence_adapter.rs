//! Apply feed-forward layers to sequence-shaped input.
//!
//! A layer that only understands per-example input `(batch, ...)` can be
//! wrapped in [`SequenceAdapter`]; given a [`Space::Sequence`] input the
//! adapter hands the inner layer the per-step space and runs it over the
//! time axis of `(batch, time, ...)` tensors.

use crate::vae_binding::NoiseSource;
use crate::vae_error::{Result, VaeError};
use crate::vae_params::{ParamInit, ParamStore};
use crate::vae_space::Space;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Activation, Embedding, Linear, Module};

/// Capability interface of a layer in a feed-forward stack
pub trait LayerT {
    /// Fix the input space; parameters are created here
    fn set_input_space(&mut self, space: Space) -> Result<()>;

    fn output_space(&self) -> Result<Space>;

    fn fprop(&self, state_below: &Tensor) -> Result<Tensor>;

    /// Layers that already handle a time axis themselves
    fn rnn_friendly(&self) -> bool {
        false
    }

    fn layer_name(&self) -> &str;
}

///
/// Wraps a per-timestep layer. Sequence input is unrolled with an
/// explicit loop over axis 1 and the step outputs are stacked back.
///
pub struct SequenceAdapter<L: LayerT> {
    inner: L,
    sequence_space: bool,
}

impl<L: LayerT> SequenceAdapter<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            sequence_space: false,
        }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    /// whether the last input space was a sequence we unroll
    pub fn is_unrolling(&self) -> bool {
        self.sequence_space
    }
}

impl<L: LayerT> LayerT for SequenceAdapter<L> {
    fn set_input_space(&mut self, space: Space) -> Result<()> {
        match space {
            Space::Sequence(step) if !self.inner.rnn_friendly() => {
                self.sequence_space = true;
                self.inner.set_input_space(*step)
            }
            other => {
                self.sequence_space = false;
                self.inner.set_input_space(other)
            }
        }
    }

    fn output_space(&self) -> Result<Space> {
        let space = self.inner.output_space()?;
        if self.sequence_space && !space.is_sequence() {
            Ok(Space::sequence(space))
        } else {
            Ok(space)
        }
    }

    fn fprop(&self, state_below: &Tensor) -> Result<Tensor> {
        if !self.sequence_space {
            return self.inner.fprop(state_below);
        }

        let dims = state_below.dims();
        if dims.len() < 3 || dims[1] == 0 {
            return Err(VaeError::InvalidShape {
                expected: "(batch, time >= 1, ...)".into(),
                got: dims.to_vec(),
            });
        }

        let ntime = dims[1];
        let mut steps = Vec::with_capacity(ntime);
        for t in 0..ntime {
            let x_t = state_below.narrow(1, t, 1)?.squeeze(1)?;
            steps.push(self.inner.fprop(&x_t)?);
        }
        Ok(Tensor::stack(&steps, 1)?)
    }

    fn rnn_friendly(&self) -> bool {
        true
    }

    fn layer_name(&self) -> &str {
        self.inner.layer_name()
    }
}

/// Seeded parameter storage shared by the concrete layers below
struct LayerParams {
    store: ParamStore,
    noise: NoiseSource,
}

impl LayerParams {
    fn new(seed: u64, dtype: DType, device: &Device) -> Self {
        Self {
            store: ParamStore::new(dtype, device),
            noise: NoiseSource::new(seed, dtype, device),
        }
    }
}

fn no_input_space(name: &str) -> VaeError {
    candle_core::Error::Msg(format!("`{}` has no input space", name)).into()
}

/// y = act(x W^T + b) on `Vector` input
pub struct DenseLayer {
    name: String,
    dim: usize,
    activation: Option<Activation>,
    params: LayerParams,
    linear: Option<Linear>,
}

impl DenseLayer {
    pub fn new(
        name: &str,
        dim: usize,
        activation: Option<Activation>,
        seed: u64,
        dtype: DType,
        device: &Device,
    ) -> Self {
        Self {
            name: name.to_string(),
            dim,
            activation,
            params: LayerParams::new(seed, dtype, device),
            linear: None,
        }
    }

    pub fn param_store(&self) -> &ParamStore {
        &self.params.store
    }
}

impl LayerT for DenseLayer {
    fn set_input_space(&mut self, space: Space) -> Result<()> {
        let in_dim = match space {
            Space::Vector { dim } => dim,
            other => {
                return Err(VaeError::InvalidShape {
                    expected: format!("VectorSpace input for layer `{}`", self.name),
                    got: vec![other.dim()],
                })
            }
        };
        let linear = self
            .params
            .store
            .linear(in_dim, self.dim, &self.name, &self.params.noise)?;
        self.linear = Some(linear);
        Ok(())
    }

    fn output_space(&self) -> Result<Space> {
        Ok(Space::Vector { dim: self.dim })
    }

    fn fprop(&self, state_below: &Tensor) -> Result<Tensor> {
        let linear = self
            .linear
            .as_ref()
            .ok_or_else(|| no_input_space(&self.name))?;
        let h = linear.forward(state_below)?;
        match &self.activation {
            Some(act) => Ok(act.forward(&h)?),
            None => Ok(h),
        }
    }

    fn layer_name(&self) -> &str {
        &self.name
    }
}

/// Embedding lookup of `Index` input, concatenated across the index dim
pub struct ProjectionLayer {
    name: String,
    emb_dim: usize,
    params: LayerParams,
    embedding: Option<(Embedding, usize)>,
}

impl ProjectionLayer {
    pub fn new(name: &str, emb_dim: usize, seed: u64, dtype: DType, device: &Device) -> Self {
        Self {
            name: name.to_string(),
            emb_dim,
            params: LayerParams::new(seed, dtype, device),
            embedding: None,
        }
    }

    pub fn param_store(&self) -> &ParamStore {
        &self.params.store
    }
}

impl LayerT for ProjectionLayer {
    fn set_input_space(&mut self, space: Space) -> Result<()> {
        let (dim, max_labels) = match space {
            Space::Index { dim, max_labels } => (dim, max_labels),
            other => {
                return Err(VaeError::InvalidShape {
                    expected: format!("IndexSpace input for layer `{}`", self.name),
                    got: vec![other.dim()],
                })
            }
        };
        let weight = self.params.store.var(
            &format!("{}.weight", self.name),
            (max_labels, self.emb_dim),
            ParamInit::Normal { stdev: 1.0 },
            &self.params.noise,
        )?;
        self.embedding = Some((Embedding::new(weight, self.emb_dim), dim));
        Ok(())
    }

    fn output_space(&self) -> Result<Space> {
        let (_, dim) = self
            .embedding
            .as_ref()
            .ok_or_else(|| no_input_space(&self.name))?;
        Ok(Space::Vector {
            dim: dim * self.emb_dim,
        })
    }

    fn fprop(&self, state_below: &Tensor) -> Result<Tensor> {
        let (embedding, dim) = self
            .embedding
            .as_ref()
            .ok_or_else(|| no_input_space(&self.name))?;
        let nbatch = state_below.dim(0)?;
        let emb = embedding.forward(state_below)?;
        Ok(emb.reshape((nbatch, dim * self.emb_dim))?)
    }

    fn layer_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn dense() -> DenseLayer {
        DenseLayer::new(
            "h0",
            4,
            Some(Activation::Sigmoid),
            11,
            DType::F32,
            &Device::Cpu,
        )
    }

    #[test]
    fn vector_input_passes_through() -> anyhow::Result<()> {
        let mut layer = SequenceAdapter::new(dense());
        layer.set_input_space(Space::Vector { dim: 3 })?;
        assert!(!layer.is_unrolling());
        assert_eq!(layer.output_space()?, Space::Vector { dim: 4 });

        let x = Tensor::ones((5, 3), DType::F32, &Device::Cpu)?;
        assert_eq!(layer.fprop(&x)?.dims(), &[5, 4]);
        Ok(())
    }

    #[test]
    fn sequence_output_space_wrapped_once() -> anyhow::Result<()> {
        let mut layer = SequenceAdapter::new(dense());
        layer.set_input_space(Space::sequence(Space::Vector { dim: 3 }))?;
        assert!(layer.is_unrolling());
        assert_eq!(
            layer.output_space()?,
            Space::sequence(Space::Vector { dim: 4 })
        );

        // wrapping an adapter must not nest the sequence twice
        let mut outer = SequenceAdapter::new(SequenceAdapter::new(dense()));
        outer.set_input_space(Space::sequence(Space::Vector { dim: 3 }))?;
        assert_eq!(
            outer.output_space()?,
            Space::sequence(Space::Vector { dim: 4 })
        );
        Ok(())
    }

    #[test]
    fn unrolled_matches_per_step() -> anyhow::Result<()> {
        let mut layer = SequenceAdapter::new(dense());
        layer.set_input_space(Space::sequence(Space::Vector { dim: 3 }))?;

        let x = Tensor::arange(0f32, 30f32, &Device::Cpu)?
            .reshape((2, 5, 3))?
            .affine(0.1, -1.0)?;
        let y = layer.fprop(&x)?;
        assert_eq!(y.dims(), &[2, 5, 4]);

        for t in 0..5 {
            let x_t = x.narrow(1, t, 1)?.squeeze(1)?;
            let y_t = layer.inner().fprop(&x_t)?.to_vec2::<f32>()?;
            let got = y.narrow(1, t, 1)?.squeeze(1)?.to_vec2::<f32>()?;
            for (a, b) in y_t.iter().flatten().zip(got.iter().flatten()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
            }
        }
        Ok(())
    }

    #[test]
    fn projection_over_sequence() -> anyhow::Result<()> {
        let proj = ProjectionLayer::new("proj", 6, 5, DType::F32, &Device::Cpu);
        let mut layer = SequenceAdapter::new(proj);
        layer.set_input_space(Space::sequence(Space::Index {
            dim: 1,
            max_labels: 10,
        }))?;
        assert_eq!(
            layer.output_space()?,
            Space::sequence(Space::Vector { dim: 6 })
        );

        let ids = Tensor::new(&[[[1u32], [2], [9]], [[0], [0], [3]]], &Device::Cpu)?;
        let y = layer.fprop(&ids)?;
        assert_eq!(y.dims(), &[2, 3, 6]);
        Ok(())
    }

    #[test]
    fn projection_needs_input_space() -> anyhow::Result<()> {
        let mut proj = ProjectionLayer::new("proj", 3, 5, DType::F32, &Device::Cpu);
        assert!(proj.output_space().is_err());
        let ids = Tensor::new(&[[1u32, 2]], &Device::Cpu)?;
        assert!(proj.fprop(&ids).is_err());

        proj.set_input_space(Space::Index {
            dim: 2,
            max_labels: 4,
        })?;
        assert_eq!(proj.output_space()?, Space::Vector { dim: 6 });
        assert_eq!(proj.fprop(&ids)?.dims(), &[1, 6]);
        Ok(())
    }

    #[test]
    fn dense_output_in_unit_interval() -> anyhow::Result<()> {
        let mut layer = dense();
        layer.set_input_space(Space::Vector { dim: 3 })?;
        let x = Tensor::arange(-6f32, 6f32, &Device::Cpu)?.reshape((4, 3))?;
        let y = layer.fprop(&x)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(y.iter().all(|&v| (0.0..=1.0).contains(&v)));
        Ok(())
    }

    #[test]
    fn dense_rejects_index_space() {
        let mut layer = dense();
        let ret = layer.set_input_space(Space::Index {
            dim: 1,
            max_labels: 3,
        });
        assert!(matches!(ret, Err(VaeError::InvalidShape { .. })));
    }
}
