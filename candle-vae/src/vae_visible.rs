use crate::candle_aux_layers::StackLayers;
use crate::candle_loss_functions::{bernoulli_log_density, gaussian_log_density};
use crate::vae_binding::{BindSlot, VaeBinding};
use crate::vae_error::{Result, VaeError};
use crate::vae_params::ParamStore;
use crate::vae_posterior::gaussian_params;
use candle_core::{Tensor, D};
use candle_nn::{ops, Activation, Linear, Module};
use std::collections::BTreeMap;

/// Observation model p(x | z)
pub trait VisibleT {
    fn bind(&mut self, binding: VaeBinding) -> Result<()>;

    fn is_bound(&self) -> bool;

    /// Create the decoder from `nhid` latent units to `nvis` outputs
    fn initialize_parameters(&mut self, nhid: usize, nvis: usize) -> Result<()>;

    fn param_store(&self) -> Option<&ParamStore>;

    /// theta(z): parameters of p(x | z), each (batch, nvis)
    fn decode_theta(&self, z_nk: &Tensor) -> Result<Vec<Tensor>>;

    /// x ~ p(x | z) for `num_samples` rows of theta
    fn sample_from_p_x_given_z(&self, num_samples: usize, theta: &[Tensor]) -> Result<Tensor>;

    /// element-wise log p(x | z), same shape as broadcast(x, theta)
    fn expectation_term(&self, x: &Tensor, theta: &[Tensor]) -> Result<Tensor>;

    /// log p(x | z) summed over the visible (last) axis
    fn log_p_x_given_z(&self, x: &Tensor, theta: &[Tensor]) -> Result<Tensor> {
        Ok(self.expectation_term(x, theta)?.sum(D::Minus1)?)
    }

    /// E[x | z]
    fn means_from_theta(&self, theta: &[Tensor]) -> Result<Tensor>;

    fn monitoring_channels_from_theta(&self, theta: &[Tensor]) -> Result<BTreeMap<String, Tensor>>;

    /// a representative weight matrix for visualization
    fn get_weights(&self) -> Result<Tensor>;
}

#[derive(Clone, Debug)]
pub struct VisibleConfig {
    /// parameter name prefix
    pub name: String,
    /// hidden layer sizes of the decoder network
    pub layers: Vec<usize>,
    pub activation: Activation,
    /// log_sigma is clamped to [-max_log_sigma, max_log_sigma]
    pub max_log_sigma: f64,
}

impl Default for VisibleConfig {
    fn default() -> Self {
        Self {
            name: "dec".into(),
            layers: vec![128],
            activation: Activation::Relu,
            max_log_sigma: 8.,
        }
    }
}

/// MLP `{name}.fc.{j}` followed by one linear head per theta component
struct MlpDecoder {
    fc: StackLayers<Linear>,
    heads: Vec<Linear>,
}

impl MlpDecoder {
    fn build(
        config: &VisibleConfig,
        slot: &BindSlot,
        heads: &[&str],
        nhid: usize,
        nvis: usize,
    ) -> Result<(Self, ParamStore)> {
        let binding = slot.binding("Visible")?;
        let noise = slot.noise("Visible")?;
        let store = ParamStore::new(binding.dtype, &binding.device);

        let (fc, prev_dim) = StackLayers::mlp(
            &store,
            noise,
            &config.name,
            nhid,
            &config.layers,
            config.activation,
        )?;

        let heads = heads
            .iter()
            .map(|h| store.linear(prev_dim, nvis, &format!("{}.x.{}", config.name, h), noise))
            .collect::<Result<Vec<_>>>()?;

        Ok((Self { fc, heads }, store))
    }

    fn forward(&self, z_nk: &Tensor) -> Result<Vec<Tensor>> {
        let h_nl = self.fc.forward(z_nk)?;
        Ok(self
            .heads
            .iter()
            .map(|head| head.forward(&h_nl))
            .collect::<candle_core::Result<Vec<_>>>()?)
    }

    fn weights(&self) -> Result<Tensor> {
        self.heads
            .first()
            .map(|h| h.weight().clone())
            .ok_or_else(|| candle_core::Error::Msg("decoder without output head".into()).into())
    }
}

fn check_rows(theta: &Tensor, num_samples: usize) -> Result<()> {
    if theta.dim(0)? != num_samples {
        return Err(VaeError::InvalidShape {
            expected: format!("theta with {} rows", num_samples),
            got: theta.dims().to_vec(),
        });
    }
    Ok(())
}

fn not_initialized<T>() -> Result<T> {
    Err(candle_core::Error::Msg("visible decoder is not initialized".into()).into())
}

///
/// Binary observations: p(x | z) = prod_j Bernoulli(x_j; sigmoid(l_j(z)))
///
/// theta = (logits,)
///
pub struct BernoulliVisible {
    config: VisibleConfig,
    slot: BindSlot,
    store: Option<ParamStore>,
    decoder: Option<MlpDecoder>,
}

impl BernoulliVisible {
    pub fn new(config: VisibleConfig) -> Self {
        Self {
            config,
            slot: BindSlot::default(),
            store: None,
            decoder: None,
        }
    }

    fn logits<'a>(&self, theta: &'a [Tensor]) -> Result<&'a Tensor> {
        match theta {
            [logits] => Ok(logits),
            _ => Err(VaeError::InvalidShape {
                expected: "theta as (logits,)".into(),
                got: vec![theta.len()],
            }),
        }
    }
}

impl VisibleT for BernoulliVisible {
    fn bind(&mut self, binding: VaeBinding) -> Result<()> {
        self.slot.bind("Visible", binding)
    }

    fn is_bound(&self) -> bool {
        self.slot.is_bound()
    }

    fn initialize_parameters(&mut self, nhid: usize, nvis: usize) -> Result<()> {
        let (decoder, store) = MlpDecoder::build(&self.config, &self.slot, &["logit"], nhid, nvis)?;
        self.decoder = Some(decoder);
        self.store = Some(store);
        Ok(())
    }

    fn param_store(&self) -> Option<&ParamStore> {
        self.store.as_ref()
    }

    fn decode_theta(&self, z_nk: &Tensor) -> Result<Vec<Tensor>> {
        match &self.decoder {
            Some(dec) => dec.forward(z_nk),
            None => not_initialized(),
        }
    }

    fn sample_from_p_x_given_z(&self, num_samples: usize, theta: &[Tensor]) -> Result<Tensor> {
        let p = self.means_from_theta(theta)?;
        check_rows(&p, num_samples)?;
        let u = self.slot.noise("Visible")?.rand_uniform(p.dims())?;
        Ok(u.lt(&p)?.to_dtype(p.dtype())?)
    }

    fn expectation_term(&self, x: &Tensor, theta: &[Tensor]) -> Result<Tensor> {
        let logits = self.logits(theta)?;
        let x = x.broadcast_as(logits.shape())?;
        Ok(bernoulli_log_density(&x, logits)?)
    }

    fn means_from_theta(&self, theta: &[Tensor]) -> Result<Tensor> {
        Ok(ops::sigmoid(self.logits(theta)?)?)
    }

    fn monitoring_channels_from_theta(&self, theta: &[Tensor]) -> Result<BTreeMap<String, Tensor>> {
        let p = self.means_from_theta(theta)?;
        let mut rval = BTreeMap::new();
        rval.insert("vis_p_mean".to_string(), p.mean_all()?);
        rval.insert("vis_p_min".to_string(), p.min_all()?);
        rval.insert("vis_p_max".to_string(), p.max_all()?);
        Ok(rval)
    }

    fn get_weights(&self) -> Result<Tensor> {
        match &self.decoder {
            Some(dec) => dec.weights(),
            None => not_initialized(),
        }
    }
}

///
/// Real-valued observations: p(x | z) = prod_j N(x_j; mu_j(z), sigma_j(z)^2)
///
/// theta = (mu, log_sigma)
///
pub struct GaussianVisible {
    config: VisibleConfig,
    slot: BindSlot,
    store: Option<ParamStore>,
    decoder: Option<MlpDecoder>,
}

impl GaussianVisible {
    pub fn new(config: VisibleConfig) -> Self {
        Self {
            config,
            slot: BindSlot::default(),
            store: None,
            decoder: None,
        }
    }
}

impl VisibleT for GaussianVisible {
    fn bind(&mut self, binding: VaeBinding) -> Result<()> {
        self.slot.bind("Visible", binding)
    }

    fn is_bound(&self) -> bool {
        self.slot.is_bound()
    }

    fn initialize_parameters(&mut self, nhid: usize, nvis: usize) -> Result<()> {
        let (decoder, store) =
            MlpDecoder::build(&self.config, &self.slot, &["mu", "log_sigma"], nhid, nvis)?;
        self.decoder = Some(decoder);
        self.store = Some(store);
        Ok(())
    }

    fn param_store(&self) -> Option<&ParamStore> {
        self.store.as_ref()
    }

    fn decode_theta(&self, z_nk: &Tensor) -> Result<Vec<Tensor>> {
        let max_ls = self.config.max_log_sigma;
        match &self.decoder {
            Some(dec) => {
                let mut theta = dec.forward(z_nk)?;
                theta[1] = theta[1].clamp(-max_ls, max_ls)?;
                Ok(theta)
            }
            None => not_initialized(),
        }
    }

    fn sample_from_p_x_given_z(&self, num_samples: usize, theta: &[Tensor]) -> Result<Tensor> {
        let (mu, log_sigma) = gaussian_params(theta, "theta")?;
        check_rows(mu, num_samples)?;
        let eps = self.slot.noise("Visible")?.randn(mu.dims())?;
        Ok(eps.mul(&log_sigma.exp()?)?.add(mu)?)
    }

    fn expectation_term(&self, x: &Tensor, theta: &[Tensor]) -> Result<Tensor> {
        let (mu, log_sigma) = gaussian_params(theta, "theta")?;
        Ok(gaussian_log_density(x, mu, log_sigma)?)
    }

    fn means_from_theta(&self, theta: &[Tensor]) -> Result<Tensor> {
        let (mu, _) = gaussian_params(theta, "theta")?;
        Ok(mu.clone())
    }

    fn monitoring_channels_from_theta(&self, theta: &[Tensor]) -> Result<BTreeMap<String, Tensor>> {
        let (mu, log_sigma) = gaussian_params(theta, "theta")?;
        let mut rval = BTreeMap::new();
        rval.insert("vis_mu_mean".to_string(), mu.mean_all()?);
        rval.insert("vis_sigma_mean".to_string(), log_sigma.exp()?.mean_all()?);
        Ok(rval)
    }

    fn get_weights(&self) -> Result<Tensor> {
        match &self.decoder {
            Some(dec) => dec.weights(),
            None => not_initialized(),
        }
    }
}
