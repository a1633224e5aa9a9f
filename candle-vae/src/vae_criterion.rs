use crate::vae_error::{Result, VaeError};
use crate::vae_model::Vae;
use crate::vae_space::Space;
use candle_core::Tensor;
use std::collections::BTreeMap;

/// Training objective evaluated on a minibatch
pub trait CriterionT {
    fn num_samples(&self) -> usize;

    /// scalar loss to minimize
    fn expr(&self, vae: &Vae, x_nd: &Tensor) -> Result<Tensor>;

    /// scalar diagnostics of the objective
    fn monitoring_channels(&self, vae: &Vae, x_nd: &Tensor) -> Result<BTreeMap<String, Tensor>>;

    /// loss and channels sharing one noise draw
    fn evaluate(&self, vae: &Vae, x_nd: &Tensor) -> Result<(Tensor, BTreeMap<String, Tensor>)>;
}

fn check_num_samples(num_samples: usize) -> Result<usize> {
    if num_samples < 1 {
        return Err(VaeError::InvalidNumSamples(num_samples));
    }
    Ok(num_samples)
}

fn validate_data(vae: &Vae, x_nd: &Tensor) -> Result<()> {
    Space::Vector { dim: vae.nvis() }.validate(x_nd)
}

/// Negative mean of the variational lower bound
pub struct VaeCriterion {
    num_samples: usize,
}

impl VaeCriterion {
    pub fn new(num_samples: usize) -> Result<Self> {
        Ok(Self {
            num_samples: check_num_samples(num_samples)?,
        })
    }
}

impl CriterionT for VaeCriterion {
    fn num_samples(&self) -> usize {
        self.num_samples
    }

    fn expr(&self, vae: &Vae, x_nd: &Tensor) -> Result<Tensor> {
        validate_data(vae, x_nd)?;
        Ok(vae
            .log_likelihood_lower_bound(x_nd, self.num_samples)?
            .mean_all()?
            .neg()?)
    }

    fn monitoring_channels(&self, vae: &Vae, x_nd: &Tensor) -> Result<BTreeMap<String, Tensor>> {
        Ok(self.evaluate(vae, x_nd)?.1)
    }

    fn evaluate(&self, vae: &Vae, x_nd: &Tensor) -> Result<(Tensor, BTreeMap<String, Tensor>)> {
        validate_data(vae, x_nd)?;
        let terms = vae.log_likelihood_lower_bound_terms(x_nd, self.num_samples)?;
        let loss = terms.lower_bound()?.mean_all()?.neg()?;

        let mut rval = BTreeMap::new();
        rval.insert("kl_divergence".to_string(), terms.kl.mean_all()?);
        rval.insert(
            "expectation_term".to_string(),
            terms.expectation.mean_all()?,
        );
        Ok((loss, rval))
    }
}

/// Negative mean of the importance-sampling log-likelihood estimate
pub struct ImportanceSamplingCriterion {
    num_samples: usize,
}

impl ImportanceSamplingCriterion {
    pub fn new(num_samples: usize) -> Result<Self> {
        Ok(Self {
            num_samples: check_num_samples(num_samples)?,
        })
    }
}

impl CriterionT for ImportanceSamplingCriterion {
    fn num_samples(&self) -> usize {
        self.num_samples
    }

    fn expr(&self, vae: &Vae, x_nd: &Tensor) -> Result<Tensor> {
        validate_data(vae, x_nd)?;
        Ok(vae
            .log_likelihood_approximation(x_nd, self.num_samples)?
            .mean_all()?
            .neg()?)
    }

    fn monitoring_channels(&self, vae: &Vae, x_nd: &Tensor) -> Result<BTreeMap<String, Tensor>> {
        Ok(self.evaluate(vae, x_nd)?.1)
    }

    fn evaluate(&self, vae: &Vae, x_nd: &Tensor) -> Result<(Tensor, BTreeMap<String, Tensor>)> {
        let loss = self.expr(vae, x_nd)?;
        let mut rval = BTreeMap::new();
        rval.insert("log_likelihood_approximation".to_string(), loss.neg()?);
        Ok((loss, rval))
    }
}
