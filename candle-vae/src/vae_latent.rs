use crate::vae_binding::{BindSlot, VaeBinding};
use crate::vae_error::{Result, VaeError};
use crate::vae_kl::{DiagonalGaussianPriorPosteriorKl, KlIntegratorT};
use crate::vae_params::ParamStore;
use crate::vae_posterior::{DiagonalGaussianPosterior, PosteriorConfig, PosteriorT};
use crate::vae_prior::{DiagonalGaussianPrior, PriorT};
use candle_core::{Shape, Tensor};
use std::collections::BTreeMap;

///
/// Latent side of the VAE: prior p(z), posterior q(z | x), and an
/// optional analytical KL integrator. The integrator's prior/posterior
/// pair is checked here, when the pieces are put together.
///
pub struct Latent {
    prior: Box<dyn PriorT>,
    posterior: Box<dyn PosteriorT>,
    kl_integrator: Option<Box<dyn KlIntegratorT>>,
    slot: BindSlot,
}

impl Latent {
    pub fn new(
        prior: Box<dyn PriorT>,
        posterior: Box<dyn PosteriorT>,
        kl_integrator: Option<Box<dyn KlIntegratorT>>,
    ) -> Result<Self> {
        if let Some(kl) = kl_integrator.as_ref() {
            kl.validate(prior.as_ref(), posterior.as_ref())?;
        }
        Ok(Self {
            prior,
            posterior,
            kl_integrator,
            slot: BindSlot::default(),
        })
    }

    /// Gaussian prior and posterior with the analytical KL
    pub fn diagonal_gaussian(learn_prior: bool, config: PosteriorConfig) -> Result<Self> {
        Self::new(
            Box::new(DiagonalGaussianPrior::new(learn_prior)),
            Box::new(DiagonalGaussianPosterior::new(config)),
            Some(Box::new(DiagonalGaussianPriorPosteriorKl)),
        )
    }

    pub fn prior(&self) -> &dyn PriorT {
        self.prior.as_ref()
    }

    pub fn posterior(&self) -> &dyn PosteriorT {
        self.posterior.as_ref()
    }

    pub fn has_analytical_kl(&self) -> bool {
        self.kl_integrator.is_some()
    }

    /// Attach to a VAE; the prior and posterior get seeds derived from
    /// `binding`
    pub fn bind(&mut self, binding: VaeBinding) -> Result<()> {
        self.slot.bind("Latent", binding.clone())?;
        let noise = self.slot.noise("Latent")?;
        self.prior.bind(binding.derive(noise))?;
        self.posterior.bind(binding.derive(noise))?;
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.slot.is_bound()
    }

    pub fn initialize_parameters(&mut self, nvis: usize, nhid: usize) -> Result<()> {
        self.posterior.initialize_parameters(nvis, nhid)?;
        self.prior.initialize_parameters(nhid)?;
        Ok(())
    }

    /// posterior (encoder) parameters first, then the prior's
    pub fn param_stores(&self) -> Vec<&ParamStore> {
        self.posterior
            .param_store()
            .into_iter()
            .chain(self.prior.param_store())
            .collect()
    }

    pub fn encode_phi(&self, x_nd: &Tensor) -> Result<Vec<Tensor>> {
        self.posterior.encode_phi(x_nd)
    }

    pub fn sample_from_epsilon<S: Into<Shape>>(&self, shape: S) -> Result<Tensor> {
        self.posterior.sample_from_epsilon(shape.into())
    }

    pub fn sample_from_q_z_given_x(&self, epsilon: &Tensor, phi: &[Tensor]) -> Result<Tensor> {
        self.posterior.sample_from_q_z_given_x(epsilon, phi)
    }

    pub fn sample_from_p_z(&self, num_samples: usize) -> Result<Tensor> {
        self.prior.sample_from_p_z(num_samples)
    }

    pub fn log_q_z_given_x(&self, z: &Tensor, phi: &[Tensor]) -> Result<Tensor> {
        self.posterior.log_q_z_given_x(z, phi)
    }

    pub fn log_p_z(&self, z: &Tensor) -> Result<Tensor> {
        self.prior.log_p_z(z)
    }

    /// KL(q(z | x) || p(z)) per example, shape (batch,)
    ///
    /// * `phi` - posterior parameters
    /// * `approximate` - use the Monte-Carlo estimate even if an
    ///   analytical integrator is available
    /// * `epsilon` - noise (S, batch, nhid) for the Monte-Carlo estimate;
    ///   one fresh draw is used if absent
    pub fn kl_divergence_term(
        &self,
        phi: &[Tensor],
        approximate: bool,
        epsilon: Option<&Tensor>,
    ) -> Result<Tensor> {
        if let (false, Some(kl)) = (approximate, self.kl_integrator.as_ref()) {
            let theta = self.prior.prior_theta()?;
            return kl.kl_divergence(phi, &theta);
        }

        let epsilon = match epsilon {
            Some(eps) => eps.clone(),
            None => {
                let (nbatch, nhid) = phi
                    .first()
                    .ok_or_else(|| VaeError::InvalidShape {
                        expected: "non-empty phi".into(),
                        got: vec![],
                    })?
                    .dims2()?;
                self.sample_from_epsilon((1, nbatch, nhid))?
            }
        };
        let z = self.sample_from_q_z_given_x(&epsilon, phi)?;
        let log_q = self.log_q_z_given_x(&z, phi)?;
        let log_p = self.log_p_z(&z)?;
        Ok((log_q - log_p)?.mean(0)?)
    }

    pub fn monitoring_channels_from_phi(&self, phi: &[Tensor]) -> Result<BTreeMap<String, Tensor>> {
        self.posterior.monitoring_channels_from_phi(phi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vae_prior::DIAGONAL_GAUSSIAN_PRIOR;
    use candle_core::{DType, Device};

    /// a prior family no integrator is registered for
    struct LaplacePrior(DiagonalGaussianPrior);

    impl PriorT for LaplacePrior {
        fn kind(&self) -> &'static str {
            "LaplacePrior"
        }
        fn bind(&mut self, binding: VaeBinding) -> Result<()> {
            self.0.bind(binding)
        }
        fn is_bound(&self) -> bool {
            self.0.is_bound()
        }
        fn initialize_parameters(&mut self, nhid: usize) -> Result<()> {
            self.0.initialize_parameters(nhid)
        }
        fn param_store(&self) -> Option<&ParamStore> {
            self.0.param_store()
        }
        fn prior_theta(&self) -> Result<Vec<Tensor>> {
            self.0.prior_theta()
        }
        fn sample_from_p_z(&self, num_samples: usize) -> Result<Tensor> {
            self.0.sample_from_p_z(num_samples)
        }
        fn log_p_z(&self, z: &Tensor) -> Result<Tensor> {
            self.0.log_p_z(z)
        }
    }

    fn binding() -> VaeBinding {
        VaeBinding {
            seed: 5,
            dtype: DType::F32,
            device: Device::Cpu,
        }
    }

    #[test]
    fn incompatible_pair_rejected_at_composition() {
        let ret = Latent::new(
            Box::new(LaplacePrior(DiagonalGaussianPrior::default())),
            Box::new(DiagonalGaussianPosterior::new(PosteriorConfig::default())),
            Some(Box::new(DiagonalGaussianPriorPosteriorKl)),
        );
        match ret {
            Err(VaeError::IncompatibleKl {
                prior,
                posterior,
                expected_prior,
                ..
            }) => {
                assert_eq!(prior, "LaplacePrior");
                assert_eq!(posterior, "DiagonalGaussianPosterior");
                assert_eq!(expected_prior, DIAGONAL_GAUSSIAN_PRIOR);
            }
            _ => panic!("expected an incompatible KL error"),
        }
    }

    #[test]
    fn monte_carlo_kl_without_integrator() -> Result<()> {
        let mut latent = Latent::new(
            Box::new(LaplacePrior(DiagonalGaussianPrior::default())),
            Box::new(DiagonalGaussianPosterior::new(PosteriorConfig {
                layers: vec![],
                ..Default::default()
            })),
            None,
        )?;
        assert!(!latent.has_analytical_kl());
        latent.bind(binding())?;
        latent.initialize_parameters(3, 2)?;

        let x = Tensor::ones((4, 3), DType::F32, &Device::Cpu)?;
        let phi = latent.encode_phi(&x)?;
        let kl = latent.kl_divergence_term(&phi, false, None)?;
        assert_eq!(kl.dims(), &[4]);
        Ok(())
    }

    #[test]
    fn monte_carlo_kl_close_to_analytical() -> Result<()> {
        let mut latent = Latent::diagonal_gaussian(
            true,
            PosteriorConfig {
                layers: vec![4],
                ..Default::default()
            },
        )?;
        latent.bind(binding())?;
        latent.initialize_parameters(3, 2)?;

        let x = Tensor::ones((2, 3), DType::F32, &Device::Cpu)?;
        let phi = latent.encode_phi(&x)?;
        let exact = latent
            .kl_divergence_term(&phi, false, None)?
            .to_vec1::<f32>()?;
        let eps = latent.sample_from_epsilon((20000, 2, 2))?;
        let approx = latent
            .kl_divergence_term(&phi, true, Some(&eps))?
            .to_vec1::<f32>()?;
        for (a, b) in exact.iter().zip(approx.iter()) {
            assert!((a - b).abs() < 0.1, "exact {} vs. MC {}", a, b);
        }
        Ok(())
    }

    #[test]
    fn latent_binds_once() -> Result<()> {
        let mut latent = Latent::diagonal_gaussian(true, PosteriorConfig::default())?;
        latent.bind(binding())?;
        assert!(latent.prior().is_bound() && latent.posterior().is_bound());
        let again = latent.bind(binding());
        assert!(matches!(again, Err(VaeError::AlreadyBound("Latent"))));
        Ok(())
    }

    #[test]
    fn param_store_order() -> Result<()> {
        let mut latent = Latent::diagonal_gaussian(true, PosteriorConfig::default())?;
        latent.bind(binding())?;
        latent.initialize_parameters(3, 2)?;
        let stores = latent.param_stores();
        assert_eq!(stores.len(), 2);
        assert!(stores[1].names()?.contains(&"prior_mu".to_string()));
        Ok(())
    }
}
