use crate::vae_binding::NoiseSource;
use crate::vae_error::{Result, VaeError};
use candle_core::{DType, Device, Shape, Tensor, Var};
use candle_nn::{Linear, VarMap};

/// How a fresh parameter is filled
#[derive(Clone, Copy, Debug)]
pub enum ParamInit {
    Zeros,
    Const(f64),
    /// N(0, stdev^2) drawn from the owner's seeded noise source
    Normal { stdev: f64 },
}

fn lock_error<E: std::fmt::Display>(e: E) -> candle_core::Error {
    candle_core::Error::Msg(format!("parameter store lock: {}", e))
}

///
/// Named trainable tensors of one component. Registering a name twice
/// is a configuration error, never a silent share.
///
pub struct ParamStore {
    varmap: VarMap,
    dtype: DType,
    device: Device,
}

impl ParamStore {
    pub fn new(dtype: DType, device: &Device) -> Self {
        Self {
            varmap: VarMap::new(),
            dtype,
            device: device.clone(),
        }
    }

    /// Register a new trainable tensor `name`
    pub fn var<S: Into<Shape>>(
        &self,
        name: &str,
        shape: S,
        init: ParamInit,
        noise: &NoiseSource,
    ) -> Result<Tensor> {
        let shape: Shape = shape.into();
        let value = match init {
            ParamInit::Zeros => Tensor::zeros(shape, self.dtype, &self.device)?,
            ParamInit::Const(c) => (Tensor::ones(shape, self.dtype, &self.device)? * c)?,
            ParamInit::Normal { stdev } => (noise.randn(shape)?.to_dtype(self.dtype)? * stdev)?,
        };

        let mut data = self.varmap.data().lock().map_err(lock_error)?;

        if data.contains_key(name) {
            return Err(VaeError::DuplicateParameter(name.to_string()));
        }

        let var = Var::from_tensor(&value)?;
        let ret = var.as_tensor().clone();
        data.insert(name.to_string(), var);
        Ok(ret)
    }

    /// A dense layer with `{name}.weight` (out x in) and `{name}.bias`
    pub fn linear(
        &self,
        in_dim: usize,
        out_dim: usize,
        name: &str,
        noise: &NoiseSource,
    ) -> Result<Linear> {
        let stdev = 1.0 / (in_dim.max(1) as f64).sqrt();
        let ws = self.var(
            &format!("{}.weight", name),
            (out_dim, in_dim),
            ParamInit::Normal { stdev },
            noise,
        )?;
        let bs = self.var(&format!("{}.bias", name), out_dim, ParamInit::Zeros, noise)?;
        Ok(Linear::new(ws, Some(bs)))
    }

    /// sorted parameter names
    pub fn names(&self) -> Result<Vec<String>> {
        let data = self.varmap.data().lock().map_err(lock_error)?;
        let mut names: Vec<String> = data.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn all_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }
}
