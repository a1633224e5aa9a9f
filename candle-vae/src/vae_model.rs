use crate::candle_loss_functions::log_sum_exp;
use crate::vae_binding::{NoiseSource, VaeBinding};
use crate::vae_error::{Result, VaeError};
use crate::vae_latent::Latent;
use crate::vae_params::ParamStore;
use crate::vae_visible::VisibleT;
use candle_core::{DType, Device, Tensor, Var, D};
use log::info;
use std::collections::{BTreeMap, HashSet};

#[derive(Clone, Debug)]
pub struct VaeConfig {
    /// dimension of the observations
    pub nvis: usize,
    /// dimension of the latent code
    pub nhid: usize,
    /// minibatch size the model is trained with, if fixed
    pub batch_size: Option<usize>,
    /// every random draw of the model is derived from this seed
    pub seed: u64,
    pub dtype: DType,
    pub device: Device,
}

impl VaeConfig {
    pub fn new(nvis: usize, nhid: usize) -> Self {
        Self {
            nvis,
            nhid,
            batch_size: None,
            seed: 2043,
            dtype: DType::F32,
            device: Device::Cpu,
        }
    }
}

/// The two parts of the lower bound, each of shape (batch,)
pub struct LowerBoundTerms {
    /// KL(q(z | x) || p(z))
    pub kl: Tensor,
    /// E_q[log p(x | z)]
    pub expectation: Tensor,
}

impl LowerBoundTerms {
    pub fn lower_bound(&self) -> Result<Tensor> {
        Ok((&self.expectation - &self.kl)?)
    }
}

/// Merge `src` into `dst`, refusing to overwrite a channel
pub fn safe_update(
    dst: &mut BTreeMap<String, Tensor>,
    src: BTreeMap<String, Tensor>,
) -> Result<()> {
    for (k, v) in src {
        if dst.contains_key(&k) {
            return Err(VaeError::DuplicateChannel(k));
        }
        dst.insert(k, v);
    }
    Ok(())
}

///
/// Variational autoencoder
///
/// p(x, z) = p(z) p(x | z) with the approximate posterior q(z | x).
/// The observation model (`VisibleT`) and the latent side (`Latent`)
/// are bound to this model once and for all at construction.
///
pub struct Vae {
    config: VaeConfig,
    visible: Box<dyn VisibleT>,
    latent: Latent,
}

impl Vae {
    pub fn new(
        config: VaeConfig,
        mut visible: Box<dyn VisibleT>,
        mut latent: Latent,
    ) -> Result<Self> {
        let noise = NoiseSource::new(config.seed, config.dtype, &config.device);
        let binding = VaeBinding {
            seed: config.seed,
            dtype: config.dtype,
            device: config.device.clone(),
        };

        visible.bind(binding.derive(&noise))?;
        latent.bind(binding.derive(&noise))?;

        visible.initialize_parameters(config.nhid, config.nvis)?;
        latent.initialize_parameters(config.nvis, config.nhid)?;

        let vae = Self {
            config,
            visible,
            latent,
        };
        vae.check_unique_names()?;

        info!(
            "VAE: nvis = {}, nhid = {}, batch size = {:?}, {} parameter tensors",
            vae.config.nvis,
            vae.config.nhid,
            vae.config.batch_size,
            vae.all_vars().len()
        );
        Ok(vae)
    }

    fn check_unique_names(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for store in self
            .encoding_params()
            .into_iter()
            .chain(self.decoding_params())
        {
            for name in store.names()? {
                if !seen.insert(name.clone()) {
                    return Err(VaeError::DuplicateParameter(name));
                }
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &VaeConfig {
        &self.config
    }

    pub fn nvis(&self) -> usize {
        self.config.nvis
    }

    pub fn nhid(&self) -> usize {
        self.config.nhid
    }

    pub fn visible(&self) -> &dyn VisibleT {
        self.visible.as_ref()
    }

    pub fn latent(&self) -> &Latent {
        &self.latent
    }

    /// Release the components; they stay bound and cannot join another model
    pub fn into_parts(self) -> (Box<dyn VisibleT>, Latent) {
        (self.visible, self.latent)
    }

    /// prior and posterior parameter stores
    pub fn encoding_params(&self) -> Vec<&ParamStore> {
        self.latent.param_stores()
    }

    /// observation model parameter stores
    pub fn decoding_params(&self) -> Vec<&ParamStore> {
        self.visible.param_store().into_iter().collect()
    }

    /// every trainable variable, encoder first
    pub fn all_vars(&self) -> Vec<Var> {
        self.encoding_params()
            .into_iter()
            .chain(self.decoding_params())
            .flat_map(|s| s.all_vars())
            .collect()
    }

    pub fn get_weights(&self) -> Result<Tensor> {
        self.visible.get_weights()
    }

    /// Reparameterization noise epsilon (num_samples, batch, nhid)
    pub fn sample_epsilon(&self, num_samples: usize, batch: usize) -> Result<Tensor> {
        self.latent
            .sample_from_epsilon((num_samples, batch, self.config.nhid))
    }

    fn check_epsilon(&self, x_nd: &Tensor, epsilon: &Tensor) -> Result<()> {
        let nbatch = x_nd.dim(0)?;
        match epsilon.dims() {
            [s, b, k] if *s > 0 && *b == nbatch && *k == self.config.nhid => Ok(()),
            dims => Err(VaeError::InvalidShape {
                expected: format!("epsilon (S > 0, {}, {})", nbatch, self.config.nhid),
                got: dims.to_vec(),
            }),
        }
    }

    /// Decode theta for every latent sample: z (S, B, nhid) is flattened
    /// to (S * B, nhid) for the decoder, and each theta component comes
    /// back as (S, B, nvis).
    fn decode_samples(&self, z_sbk: &Tensor) -> Result<Vec<Tensor>> {
        let (s, b, k) = z_sbk.dims3()?;
        let theta = self.visible.decode_theta(&z_sbk.reshape((s * b, k))?)?;
        theta
            .into_iter()
            .map(|t| {
                let d = t.dim(D::Minus1)?;
                Ok(t.reshape((s, b, d))?)
            })
            .collect()
    }

    /// Lower bound on log p(x), per example
    pub fn log_likelihood_lower_bound(&self, x_nd: &Tensor, num_samples: usize) -> Result<Tensor> {
        self.log_likelihood_lower_bound_terms(x_nd, num_samples)?
            .lower_bound()
    }

    /// KL and expectation terms of the lower bound, per example
    pub fn log_likelihood_lower_bound_terms(
        &self,
        x_nd: &Tensor,
        num_samples: usize,
    ) -> Result<LowerBoundTerms> {
        let epsilon = self.sample_epsilon(num_samples, x_nd.dim(0)?)?;
        self.log_likelihood_lower_bound_terms_with_epsilon(x_nd, &epsilon)
    }

    /// Lower bound terms with the caller's noise epsilon (S, B, nhid)
    pub fn log_likelihood_lower_bound_terms_with_epsilon(
        &self,
        x_nd: &Tensor,
        epsilon: &Tensor,
    ) -> Result<LowerBoundTerms> {
        self.check_epsilon(x_nd, epsilon)?;
        let phi = self.latent.encode_phi(x_nd)?;
        let z_sbk = self.latent.sample_from_q_z_given_x(epsilon, &phi)?;

        let kl = self.latent.kl_divergence_term(&phi, false, Some(epsilon))?;

        let theta = self.decode_samples(&z_sbk)?;
        let expectation = self
            .visible
            .expectation_term(&x_nd.unsqueeze(0)?, &theta)?
            .mean(0)?
            .sum(D::Minus1)?;

        Ok(LowerBoundTerms { kl, expectation })
    }

    /// Importance-sampling estimate of log p(x), per example
    ///
    /// log (1/S) sum_s p(z_s) p(x | z_s) / q(z_s | x)
    pub fn log_likelihood_approximation(
        &self,
        x_nd: &Tensor,
        num_samples: usize,
    ) -> Result<Tensor> {
        let epsilon = self.sample_epsilon(num_samples, x_nd.dim(0)?)?;
        self.log_likelihood_approximation_with_epsilon(x_nd, &epsilon)
    }

    pub fn log_likelihood_approximation_with_epsilon(
        &self,
        x_nd: &Tensor,
        epsilon: &Tensor,
    ) -> Result<Tensor> {
        self.check_epsilon(x_nd, epsilon)?;
        let num_samples = epsilon.dim(0)?;
        let phi = self.latent.encode_phi(x_nd)?;
        let z_sbk = self.latent.sample_from_q_z_given_x(epsilon, &phi)?;
        let theta = self.decode_samples(&z_sbk)?;

        let log_q_z_x = self.latent.log_q_z_given_x(&z_sbk, &phi)?;
        let log_p_z = self.latent.log_p_z(&z_sbk)?;
        let log_p_x_z = self.visible.log_p_x_given_z(&x_nd.unsqueeze(0)?, &theta)?;

        let log_w_sb = ((log_p_z + log_p_x_z)? - log_q_z_x)?;
        Ok((log_sum_exp(&log_w_sb, 0)? - (num_samples as f64).ln())?)
    }

    /// Draw `num_samples` observations from the model:
    /// z ~ p(z), x ~ p(x | z). Returns the samples and E[x | z].
    pub fn sample(&self, num_samples: usize) -> Result<(Tensor, Tensor)> {
        let z_nk = self.latent.sample_from_p_z(num_samples)?;
        let theta = self.visible.decode_theta(&z_nk)?;
        let x_nd = self.visible.sample_from_p_x_given_z(num_samples, &theta)?;
        let means = self.visible.means_from_theta(&theta)?;
        Ok((x_nd, means))
    }

    /// Encode and decode `x_nd`. Without `noisy_encoding` the posterior
    /// mean is decoded; otherwise a posterior sample.
    pub fn reconstruct(&self, x_nd: &Tensor, noisy_encoding: bool) -> Result<(Tensor, Tensor)> {
        let nbatch = x_nd.dim(0)?;
        let epsilon = self.latent.sample_from_epsilon((nbatch, self.config.nhid))?;
        let epsilon = if noisy_encoding {
            epsilon
        } else {
            epsilon.zeros_like()?
        };

        let phi = self.latent.encode_phi(x_nd)?;
        let z_nk = self.latent.sample_from_q_z_given_x(&epsilon, &phi)?;
        let theta = self.visible.decode_theta(&z_nk)?;
        let recon = self.visible.sample_from_p_x_given_z(nbatch, &theta)?;
        let means = self.visible.means_from_theta(&theta)?;
        Ok((recon, means))
    }

    /// Posterior means E_q[z | x], shape (batch, nhid)
    pub fn encode_mean(&self, x_nd: &Tensor) -> Result<Tensor> {
        let phi = self.latent.encode_phi(x_nd)?;
        phi.into_iter()
            .next()
            .ok_or_else(|| VaeError::InvalidShape {
                expected: "non-empty phi".into(),
                got: vec![],
            })
    }

    /// Latent and visible channels from a single posterior sample
    pub fn monitoring_channels(&self, x_nd: &Tensor) -> Result<BTreeMap<String, Tensor>> {
        let epsilon = self.sample_epsilon(1, x_nd.dim(0)?)?;
        let phi = self.latent.encode_phi(x_nd)?;
        let z_sbk = self.latent.sample_from_q_z_given_x(&epsilon, &phi)?;
        let z_nk = z_sbk.squeeze(0)?;
        let theta = self.visible.decode_theta(&z_nk)?;

        let mut rval = BTreeMap::new();
        safe_update(&mut rval, self.latent.monitoring_channels_from_phi(&phi)?)?;
        safe_update(&mut rval, self.visible.monitoring_channels_from_theta(&theta)?)?;
        Ok(rval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vae_posterior::PosteriorConfig;
    use crate::vae_visible::{BernoulliVisible, VisibleConfig};
    use approx::assert_abs_diff_eq;

    fn small_vae(seed: u64) -> Result<Vae> {
        let mut config = VaeConfig::new(6, 2);
        config.seed = seed;
        Vae::new(
            config,
            Box::new(BernoulliVisible::new(VisibleConfig {
                layers: vec![8],
                ..Default::default()
            })),
            Latent::diagonal_gaussian(
                true,
                PosteriorConfig {
                    layers: vec![8],
                    ..Default::default()
                },
            )?,
        )
    }

    fn data() -> Result<Tensor> {
        Ok(Tensor::new(
            &[
                [1f32, 0., 1., 0., 1., 0.],
                [0., 1., 0., 1., 0., 1.],
                [1., 1., 0., 0., 1., 1.],
            ],
            &Device::Cpu,
        )?)
    }

    #[test]
    fn bound_decomposes() -> Result<()> {
        let vae = small_vae(1)?;
        let x = data()?;
        let eps = vae.sample_epsilon(4, 3)?;
        let terms = vae.log_likelihood_lower_bound_terms_with_epsilon(&x, &eps)?;
        let kl = terms.kl.to_vec1::<f32>()?;
        let ex = terms.expectation.to_vec1::<f32>()?;
        let lb = terms.lower_bound()?.to_vec1::<f32>()?;
        assert_eq!(lb.len(), 3);
        for i in 0..3 {
            assert_abs_diff_eq!(lb[i], ex[i] - kl[i], epsilon = 1e-6);
            assert!(kl[i] >= -1e-6);
            assert!(lb[i] <= 0.);
        }
        Ok(())
    }

    #[test]
    fn same_seed_same_model() -> Result<()> {
        let x = data()?;
        let a = small_vae(11)?
            .log_likelihood_lower_bound(&x, 2)?
            .to_vec1::<f32>()?;
        let b = small_vae(11)?
            .log_likelihood_lower_bound(&x, 2)?
            .to_vec1::<f32>()?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn wrong_epsilon_shape() -> Result<()> {
        let vae = small_vae(1)?;
        let eps = Tensor::zeros((2, 4, 2), DType::F32, &Device::Cpu)?;
        let ret = vae.log_likelihood_approximation_with_epsilon(&data()?, &eps);
        assert!(matches!(ret, Err(VaeError::InvalidShape { .. })));
        Ok(())
    }

    #[test]
    fn sample_shapes() -> Result<()> {
        let vae = small_vae(3)?;
        let (x, means) = vae.sample(5)?;
        assert_eq!(x.dims(), &[5, 6]);
        assert_eq!(means.dims(), &[5, 6]);
        Ok(())
    }

    #[test]
    fn channel_collision() -> Result<()> {
        let dev = Device::Cpu;
        let mut dst = BTreeMap::new();
        dst.insert("a".to_string(), Tensor::new(1f32, &dev)?);
        let mut src = BTreeMap::new();
        src.insert("a".to_string(), Tensor::new(2f32, &dev)?);
        assert!(matches!(
            safe_update(&mut dst, src),
            Err(VaeError::DuplicateChannel(_))
        ));
        Ok(())
    }

    #[test]
    fn monitoring_channels_merged() -> Result<()> {
        let vae = small_vae(4)?;
        let ch = vae.monitoring_channels(&data()?)?;
        assert!(ch.contains_key("post_mu_mean"));
        assert!(ch.contains_key("vis_p_mean"));
        Ok(())
    }
}
