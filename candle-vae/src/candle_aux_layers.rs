use crate::vae_binding::NoiseSource;
use crate::vae_params::ParamStore;
use candle_core::{Result, Tensor};
use candle_nn::{Activation, Linear, Module};

/// build a stack of alternating `M` and `A` layers
pub struct StackLayers<M>
where
    M: Module,
{
    module_layers: Vec<M>,
    activation_layers: Vec<Activation>,
}

impl<M> Module for StackLayers<M>
where
    M: Module,
{
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut x = input.clone();
        for (module, activation) in self.module_layers.iter().zip(self.activation_layers.iter()) {
            x = activation.forward(&module.forward(&x)?)?;
        }
        Ok(x)
    }
}

impl<M> StackLayers<M>
where
    M: Module,
{
    pub fn new() -> Self {
        Self {
            module_layers: Vec::new(),
            activation_layers: Vec::new(),
        }
    }

    /// Appends a layer after all the current layers.
    pub fn push_with_act(&mut self, layer: M, activation: Activation) {
        self.module_layers.push(layer);
        self.activation_layers.push(activation);
    }

    pub fn len(&self) -> usize {
        self.module_layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.module_layers.is_empty()
    }
}

impl<M> Default for StackLayers<M>
where
    M: Module,
{
    fn default() -> Self {
        Self::new()
    }
}

impl StackLayers<Linear> {
    /// Fully connected hidden layers `{name}.fc.{j}` registered in `store`
    ///
    /// * `in_dim` - input dimension
    /// * `layers` - hidden layer sizes (may be empty)
    /// * `activation` - applied after every hidden layer
    ///
    /// Returns the stack and its output dimension
    pub fn mlp(
        store: &ParamStore,
        noise: &NoiseSource,
        name: &str,
        in_dim: usize,
        layers: &[usize],
        activation: Activation,
    ) -> crate::vae_error::Result<(Self, usize)> {
        let mut fc = Self::new();
        let mut prev_dim = in_dim;
        for (j, &next_dim) in layers.iter().enumerate() {
            let _name = format!("{}.fc.{}", name, j);
            fc.push_with_act(store.linear(prev_dim, next_dim, &_name, noise)?, activation);
            prev_dim = next_dim;
        }
        Ok((fc, prev_dim))
    }
}
