use crate::candle_loss_functions::gaussian_log_density;
use crate::vae_binding::{BindSlot, VaeBinding};
use crate::vae_error::Result;
use crate::vae_params::{ParamInit, ParamStore};
use candle_core::{Tensor, D};

/// Prior distribution p(z) of the latent code
pub trait PriorT {
    /// distribution family, matched by KL integrators
    fn kind(&self) -> &'static str;

    /// Attach to a VAE; fails if this prior already belongs to one
    fn bind(&mut self, binding: VaeBinding) -> Result<()>;

    fn is_bound(&self) -> bool;

    /// Create parameters for an `nhid`-dimensional latent space
    fn initialize_parameters(&mut self, nhid: usize) -> Result<()>;

    /// trainable parameters (may be empty)
    fn param_store(&self) -> Option<&ParamStore>;

    /// parameters theta of p(z)
    fn prior_theta(&self) -> Result<Vec<Tensor>>;

    /// z ~ p(z), shape (num_samples, nhid)
    fn sample_from_p_z(&self, num_samples: usize) -> Result<Tensor>;

    /// log p(z) summed over the latent (last) axis
    fn log_p_z(&self, z: &Tensor) -> Result<Tensor>;
}

pub const DIAGONAL_GAUSSIAN_PRIOR: &str = "DiagonalGaussianPrior";

///
/// p(z) = prod_i N(z_i; mu_i, sigma_i^2)
///
/// `prior_mu` and `prior_log_sigma` start at zero (standard normal)
/// and are trainable only if `learn_prior` is set.
///
pub struct DiagonalGaussianPrior {
    learn_prior: bool,
    nhid: usize,
    slot: BindSlot,
    store: Option<ParamStore>,
    mu: Option<Tensor>,
    log_sigma: Option<Tensor>,
}

impl DiagonalGaussianPrior {
    pub fn new(learn_prior: bool) -> Self {
        Self {
            learn_prior,
            nhid: 0,
            slot: BindSlot::default(),
            store: None,
            mu: None,
            log_sigma: None,
        }
    }

    pub fn learn_prior(&self) -> bool {
        self.learn_prior
    }

    pub fn nhid(&self) -> usize {
        self.nhid
    }

    fn theta(&self) -> Result<(&Tensor, &Tensor)> {
        match (self.mu.as_ref(), self.log_sigma.as_ref()) {
            (Some(mu), Some(log_sigma)) => Ok((mu, log_sigma)),
            _ => Err(candle_core::Error::Msg(
                "DiagonalGaussianPrior parameters are not initialized".into(),
            )
            .into()),
        }
    }
}

impl Default for DiagonalGaussianPrior {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PriorT for DiagonalGaussianPrior {
    fn kind(&self) -> &'static str {
        DIAGONAL_GAUSSIAN_PRIOR
    }

    fn bind(&mut self, binding: VaeBinding) -> Result<()> {
        self.slot.bind("Prior", binding)
    }

    fn is_bound(&self) -> bool {
        self.slot.is_bound()
    }

    fn initialize_parameters(&mut self, nhid: usize) -> Result<()> {
        let binding = self.slot.binding("Prior")?;
        let noise = self.slot.noise("Prior")?;
        let store = ParamStore::new(binding.dtype, &binding.device);

        let (mu, log_sigma) = if self.learn_prior {
            (
                store.var("prior_mu", nhid, ParamInit::Zeros, noise)?,
                store.var("prior_log_sigma", nhid, ParamInit::Zeros, noise)?,
            )
        } else {
            (
                Tensor::zeros(nhid, binding.dtype, &binding.device)?,
                Tensor::zeros(nhid, binding.dtype, &binding.device)?,
            )
        };

        self.nhid = nhid;
        self.mu = Some(mu);
        self.log_sigma = Some(log_sigma);
        self.store = Some(store);
        Ok(())
    }

    fn param_store(&self) -> Option<&ParamStore> {
        self.store.as_ref()
    }

    fn prior_theta(&self) -> Result<Vec<Tensor>> {
        let (mu, log_sigma) = self.theta()?;
        Ok(vec![mu.clone(), log_sigma.clone()])
    }

    fn sample_from_p_z(&self, num_samples: usize) -> Result<Tensor> {
        let (mu, log_sigma) = self.theta()?;
        let eps = self.slot.noise("Prior")?.randn((num_samples, self.nhid))?;
        Ok(eps.broadcast_mul(&log_sigma.exp()?)?.broadcast_add(mu)?)
    }

    fn log_p_z(&self, z: &Tensor) -> Result<Tensor> {
        let (mu, log_sigma) = self.theta()?;
        Ok(gaussian_log_density(z, mu, log_sigma)?.sum(D::Minus1)?)
    }
}
