use crate::candle_aux_layers::StackLayers;
use crate::candle_loss_functions::gaussian_log_density;
use crate::vae_binding::{BindSlot, VaeBinding};
use crate::vae_error::{Result, VaeError};
use crate::vae_params::ParamStore;
use candle_core::{Shape, Tensor, D};
use candle_nn::{Activation, Linear, Module};
use std::collections::BTreeMap;

/// Approximate posterior q(z | x)
pub trait PosteriorT {
    /// distribution family, matched by KL integrators
    fn kind(&self) -> &'static str;

    fn bind(&mut self, binding: VaeBinding) -> Result<()>;

    fn is_bound(&self) -> bool;

    /// Create the encoder from `nvis` inputs to `nhid` latent units
    fn initialize_parameters(&mut self, nvis: usize, nhid: usize) -> Result<()>;

    fn param_store(&self) -> Option<&ParamStore>;

    /// phi(x): parameters of q(z | x)
    fn encode_phi(&self, x_nd: &Tensor) -> Result<Vec<Tensor>>;

    /// reparameterization noise of the given shape
    fn sample_from_epsilon(&self, shape: Shape) -> Result<Tensor>;

    /// z = g(epsilon, phi); phi broadcasts over leading sample axes
    fn sample_from_q_z_given_x(&self, epsilon: &Tensor, phi: &[Tensor]) -> Result<Tensor>;

    /// log q(z | x) summed over the latent (last) axis
    fn log_q_z_given_x(&self, z: &Tensor, phi: &[Tensor]) -> Result<Tensor>;

    fn monitoring_channels_from_phi(&self, phi: &[Tensor]) -> Result<BTreeMap<String, Tensor>>;
}

pub const DIAGONAL_GAUSSIAN_POSTERIOR: &str = "DiagonalGaussianPosterior";

/// Split `(mu, log_sigma)` parameter tuples
pub fn gaussian_params<'a>(params: &'a [Tensor], what: &str) -> Result<(&'a Tensor, &'a Tensor)> {
    match params {
        [mu, log_sigma] => Ok((mu, log_sigma)),
        _ => Err(VaeError::InvalidShape {
            expected: format!("{} as (mu, log_sigma)", what),
            got: vec![params.len()],
        }),
    }
}

#[derive(Clone, Debug)]
pub struct PosteriorConfig {
    /// parameter name prefix
    pub name: String,
    /// hidden layer sizes of the encoder network
    pub layers: Vec<usize>,
    pub activation: Activation,
    /// log_sigma is clamped to [-max_log_sigma, max_log_sigma]
    pub max_log_sigma: f64,
}

impl Default for PosteriorConfig {
    fn default() -> Self {
        Self {
            name: "enc".into(),
            layers: vec![128],
            activation: Activation::Relu,
            max_log_sigma: 8.,
        }
    }
}

struct GaussianEncoder {
    fc: StackLayers<Linear>,
    z_mu: Linear,
    z_log_sigma: Linear,
}

///
/// q(z | x) = prod_i N(z_i; mu_i(x), sigma_i(x)^2)
///
/// The encoder is an MLP `{name}.fc.{j}` followed by two linear heads
/// `{name}.z.mu` and `{name}.z.log_sigma`.
///
pub struct DiagonalGaussianPosterior {
    config: PosteriorConfig,
    slot: BindSlot,
    store: Option<ParamStore>,
    encoder: Option<GaussianEncoder>,
}

impl DiagonalGaussianPosterior {
    pub fn new(config: PosteriorConfig) -> Self {
        Self {
            config,
            slot: BindSlot::default(),
            store: None,
            encoder: None,
        }
    }

    pub fn config(&self) -> &PosteriorConfig {
        &self.config
    }

    fn encoder(&self) -> Result<&GaussianEncoder> {
        self.encoder.as_ref().ok_or_else(|| {
            candle_core::Error::Msg("DiagonalGaussianPosterior is not initialized".into()).into()
        })
    }
}

impl PosteriorT for DiagonalGaussianPosterior {
    fn kind(&self) -> &'static str {
        DIAGONAL_GAUSSIAN_POSTERIOR
    }

    fn bind(&mut self, binding: VaeBinding) -> Result<()> {
        self.slot.bind("Posterior", binding)
    }

    fn is_bound(&self) -> bool {
        self.slot.is_bound()
    }

    fn initialize_parameters(&mut self, nvis: usize, nhid: usize) -> Result<()> {
        let binding = self.slot.binding("Posterior")?;
        let noise = self.slot.noise("Posterior")?;
        let store = ParamStore::new(binding.dtype, &binding.device);
        let name = &self.config.name;

        let (fc, prev_dim) = StackLayers::mlp(
            &store,
            noise,
            name,
            nvis,
            &self.config.layers,
            self.config.activation,
        )?;
        let z_mu = store.linear(prev_dim, nhid, &format!("{}.z.mu", name), noise)?;
        let z_log_sigma = store.linear(prev_dim, nhid, &format!("{}.z.log_sigma", name), noise)?;

        self.encoder = Some(GaussianEncoder {
            fc,
            z_mu,
            z_log_sigma,
        });
        self.store = Some(store);
        Ok(())
    }

    fn param_store(&self) -> Option<&ParamStore> {
        self.store.as_ref()
    }

    fn encode_phi(&self, x_nd: &Tensor) -> Result<Vec<Tensor>> {
        let enc = self.encoder()?;
        let max_ls = self.config.max_log_sigma;
        let h_nl = enc.fc.forward(x_nd)?;
        let mu_nk = enc.z_mu.forward(&h_nl)?;
        let log_sigma_nk = enc.z_log_sigma.forward(&h_nl)?.clamp(-max_ls, max_ls)?;
        Ok(vec![mu_nk, log_sigma_nk])
    }

    fn sample_from_epsilon(&self, shape: Shape) -> Result<Tensor> {
        Ok(self.slot.noise("Posterior")?.randn(shape)?)
    }

    fn sample_from_q_z_given_x(&self, epsilon: &Tensor, phi: &[Tensor]) -> Result<Tensor> {
        let (mu, log_sigma) = gaussian_params(phi, "phi")?;
        Ok(epsilon
            .broadcast_mul(&log_sigma.exp()?)?
            .broadcast_add(mu)?)
    }

    fn log_q_z_given_x(&self, z: &Tensor, phi: &[Tensor]) -> Result<Tensor> {
        let (mu, log_sigma) = gaussian_params(phi, "phi")?;
        Ok(gaussian_log_density(z, mu, log_sigma)?.sum(D::Minus1)?)
    }

    fn monitoring_channels_from_phi(&self, phi: &[Tensor]) -> Result<BTreeMap<String, Tensor>> {
        let (mu, log_sigma) = gaussian_params(phi, "phi")?;
        let mut rval = BTreeMap::new();
        rval.insert("post_mu_mean".to_string(), mu.mean_all()?);
        rval.insert("post_mu_abs_max".to_string(), mu.abs()?.max_all()?);
        rval.insert("post_sigma_mean".to_string(), log_sigma.exp()?.mean_all()?);
        rval.insert("post_sigma_min".to_string(), log_sigma.exp()?.min_all()?);
        Ok(rval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device};

    fn bound_posterior(nvis: usize, nhid: usize) -> Result<DiagonalGaussianPosterior> {
        let mut q = DiagonalGaussianPosterior::new(PosteriorConfig {
            layers: vec![6],
            ..Default::default()
        });
        q.bind(VaeBinding {
            seed: 3,
            dtype: DType::F32,
            device: Device::Cpu,
        })?;
        q.initialize_parameters(nvis, nhid)?;
        Ok(q)
    }

    #[test]
    fn encoder_param_names() -> Result<()> {
        let q = bound_posterior(5, 2)?;
        let names = q.param_store().map(|s| s.names()).transpose()?.unwrap_or_default();
        assert_eq!(
            names,
            vec![
                "enc.fc.0.bias",
                "enc.fc.0.weight",
                "enc.z.log_sigma.bias",
                "enc.z.log_sigma.weight",
                "enc.z.mu.bias",
                "enc.z.mu.weight",
            ]
        );
        Ok(())
    }

    #[test]
    fn reparameterized_sample_broadcasts_over_samples() -> Result<()> {
        let q = bound_posterior(5, 2)?;
        let x = Tensor::ones((3, 5), DType::F32, &Device::Cpu)?;
        let phi = q.encode_phi(&x)?;
        assert_eq!(phi[0].dims(), &[3, 2]);

        let eps = q.sample_from_epsilon(Shape::from((4, 3, 2)))?;
        let z = q.sample_from_q_z_given_x(&eps, &phi)?;
        assert_eq!(z.dims(), &[4, 3, 2]);
        assert_eq!(q.log_q_z_given_x(&z, &phi)?.dims(), &[4, 3]);
        Ok(())
    }

    #[test]
    fn zero_noise_gives_posterior_mean() -> Result<()> {
        let q = bound_posterior(5, 2)?;
        let x = Tensor::ones((3, 5), DType::F32, &Device::Cpu)?;
        let phi = q.encode_phi(&x)?;
        let eps = Tensor::zeros((3, 2), DType::F32, &Device::Cpu)?;
        let z = q.sample_from_q_z_given_x(&eps, &phi)?;
        let diff = (z - &phi[0])?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert_abs_diff_eq!(diff, 0.0, epsilon = 1e-7);
        Ok(())
    }

    #[test]
    fn wrong_phi_arity() -> Result<()> {
        let q = bound_posterior(5, 2)?;
        let z = Tensor::zeros((1, 2), DType::F32, &Device::Cpu)?;
        let ret = q.log_q_z_given_x(&z, std::slice::from_ref(&z));
        assert!(matches!(ret, Err(VaeError::InvalidShape { .. })));
        Ok(())
    }
}
