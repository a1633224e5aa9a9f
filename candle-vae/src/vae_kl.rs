use crate::vae_error::{Result, VaeError};
use crate::vae_posterior::{gaussian_params, PosteriorT, DIAGONAL_GAUSSIAN_POSTERIOR};
use crate::vae_prior::{PriorT, DIAGONAL_GAUSSIAN_PRIOR};
use candle_core::{Tensor, D};

/// Analytical KL(q(z | x) || p(z)) for one registered prior/posterior pair
pub trait KlIntegratorT {
    fn prior_kind(&self) -> &'static str;

    fn posterior_kind(&self) -> &'static str;

    /// KL per example and latent component, shape (batch, nhid)
    ///
    /// * `phi` - parameters of q(z | x)
    /// * `theta` - parameters of p(z)
    fn per_component_kl_divergence(&self, phi: &[Tensor], theta: &[Tensor]) -> Result<Tensor>;

    /// KL per example, shape (batch,)
    fn kl_divergence(&self, phi: &[Tensor], theta: &[Tensor]) -> Result<Tensor> {
        Ok(self
            .per_component_kl_divergence(phi, theta)?
            .sum(D::Minus1)?)
    }

    /// Check that this integrator applies to the given pair
    fn validate(&self, prior: &dyn PriorT, posterior: &dyn PosteriorT) -> Result<()> {
        if prior.kind() != self.prior_kind() || posterior.kind() != self.posterior_kind() {
            return Err(VaeError::IncompatibleKl {
                prior: prior.kind(),
                posterior: posterior.kind(),
                expected_prior: self.prior_kind(),
                expected_posterior: self.posterior_kind(),
            });
        }
        Ok(())
    }
}

///
/// KL between diagonal Gaussians, per component:
///
/// log σp - log σq + 0.5 * (σq² + (μq - μp)²) / σp² - 0.5
///
pub struct DiagonalGaussianPriorPosteriorKl;

impl KlIntegratorT for DiagonalGaussianPriorPosteriorKl {
    fn prior_kind(&self) -> &'static str {
        DIAGONAL_GAUSSIAN_PRIOR
    }

    fn posterior_kind(&self) -> &'static str {
        DIAGONAL_GAUSSIAN_POSTERIOR
    }

    fn per_component_kl_divergence(&self, phi: &[Tensor], theta: &[Tensor]) -> Result<Tensor> {
        let (post_mu, post_log_sigma) = gaussian_params(phi, "phi")?;
        let (prior_mu, prior_log_sigma) = gaussian_params(theta, "theta")?;

        let post_var = (post_log_sigma * 2.)?.exp()?;
        let prior_var = (prior_log_sigma * 2.)?.exp()?;
        let sq_diff = post_mu.broadcast_sub(prior_mu)?.sqr()?;

        let ratio = ((post_var + sq_diff)? * 0.5)?.broadcast_div(&prior_var)?;

        Ok(post_log_sigma
            .neg()?
            .broadcast_add(prior_log_sigma)?
            .add(&ratio)?
            .affine(1., -0.5)?)
    }
}
