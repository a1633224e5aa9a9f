use crate::vae_error::{Result, VaeError};
use candle_core::{DType, Device, Shape, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use std::cell::RefCell;

/// What a component inherits from the VAE it is attached to
#[derive(Clone, Debug)]
pub struct VaeBinding {
    pub seed: u64,
    pub dtype: DType,
    pub device: Device,
}

impl VaeBinding {
    /// A binding for a sub-component, seeded from this binding's
    /// noise source
    pub fn derive(&self, noise: &NoiseSource) -> Self {
        Self {
            seed: noise.next_seed(),
            dtype: self.dtype,
            device: self.device.clone(),
        }
    }
}

///
/// Seeded source of random tensors. Each bound component owns one,
/// so two VAEs built with the same seed draw identical noise.
///
pub struct NoiseSource {
    rng: RefCell<StdRng>,
    dtype: DType,
    device: Device,
}

impl NoiseSource {
    pub fn new(seed: u64, dtype: DType, device: &Device) -> Self {
        Self {
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
            dtype,
            device: device.clone(),
        }
    }

    /// standard normal N(0, 1) of the given shape
    pub fn randn<S: Into<Shape>>(&self, shape: S) -> candle_core::Result<Tensor> {
        let shape: Shape = shape.into();
        let mut rng = self.rng.borrow_mut();
        let data: Vec<f32> = (0..shape.elem_count())
            .map(|_| Distribution::<f32>::sample(&StandardNormal, &mut *rng))
            .collect();
        Tensor::from_vec(data, shape, &self.device)?.to_dtype(self.dtype)
    }

    /// uniform U[0, 1) of the given shape
    pub fn rand_uniform<S: Into<Shape>>(&self, shape: S) -> candle_core::Result<Tensor> {
        let shape: Shape = shape.into();
        let mut rng = self.rng.borrow_mut();
        let data: Vec<f32> = (0..shape.elem_count())
            .map(|_| rng.random::<f32>())
            .collect();
        Tensor::from_vec(data, shape, &self.device)?.to_dtype(self.dtype)
    }

    /// a fresh seed in `[0, 2^30)` for child components
    pub fn next_seed(&self) -> u64 {
        self.rng.borrow_mut().random_range(0..(1_u64 << 30))
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

///
/// Holds the one-time attachment of a component to a VAE
///
#[derive(Default)]
pub struct BindSlot {
    binding: Option<VaeBinding>,
    noise: Option<NoiseSource>,
}

impl BindSlot {
    pub fn bind(&mut self, owner: &'static str, binding: VaeBinding) -> Result<()> {
        if self.binding.is_some() {
            return Err(VaeError::AlreadyBound(owner));
        }
        self.noise = Some(NoiseSource::new(
            binding.seed,
            binding.dtype,
            &binding.device,
        ));
        self.binding = Some(binding);
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    pub fn binding(&self, owner: &'static str) -> Result<&VaeBinding> {
        self.binding.as_ref().ok_or(VaeError::NotBound(owner))
    }

    pub fn noise(&self, owner: &'static str) -> Result<&NoiseSource> {
        self.noise.as_ref().ok_or(VaeError::NotBound(owner))
    }
}
