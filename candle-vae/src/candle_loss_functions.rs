use candle_core::{Result, Tensor};

const LN_2PI: f64 = 1.837_877_066_409_345_5; // ln(2π)

/// Numerically stable log-sum-exp along `dim`
///
/// lse(a) = log sum_s exp(a(s) - max(a)) + max(a)
///
/// * `a` - input tensor
/// * `dim` - axis to reduce (dropped in the output)
///
pub fn log_sum_exp(a: &Tensor, dim: usize) -> Result<Tensor> {
    let a_max = a.max_keepdim(dim)?.detach();
    let b = a
        .broadcast_sub(&a_max)?
        .exp()?
        .sum_keepdim(dim)?
        .log()?
        .add(&a_max)?;
    b.squeeze(dim)
}

/// Element-wise Gaussian log-density
///
/// log N(x; mu, sigma^2) = -0.5 * [ log(2π) + 2 log(sigma) + ((x - mu)/sigma)^2 ]
///
/// * `x` - observations
/// * `mu` - mean (broadcast)
/// * `log_sigma` - log standard deviation (broadcast)
///
pub fn gaussian_log_density(x: &Tensor, mu: &Tensor, log_sigma: &Tensor) -> Result<Tensor> {
    let z = x.broadcast_sub(mu)?.broadcast_div(&log_sigma.exp()?)?;
    let lnvar = (log_sigma * 2.)?;
    (z.sqr()?.broadcast_add(&lnvar)? + LN_2PI)? * (-0.5)
}

/// softplus(l) = log(1 + exp(l)) = relu(l) + log(1 + exp(-|l|))
pub fn softplus(logits: &Tensor) -> Result<Tensor> {
    let tail = (logits.abs()?.neg()?.exp()? + 1.)?.log()?;
    logits.relu()?.add(&tail)
}

/// Element-wise Bernoulli log-likelihood parameterized by logits
///
/// llik = x * l - softplus(l)
///
/// * `x` - binary (or [0, 1]) observations
/// * `logits` - log-odds (broadcast against `x`)
///
pub fn bernoulli_log_density(x: &Tensor, logits: &Tensor) -> Result<Tensor> {
    logits.broadcast_mul(x)?.sub(&softplus(logits)?)
}
