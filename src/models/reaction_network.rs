// src/models/reaction_network.rs
//! Chemical Langevin Equation for mass-action reaction networks
//!
//! # Mathematical Framework
//!
//! For species amounts `X` and reactions `j` with stoichiometric column
//! `S_j` and propensity `a_j(X)`:
//! ```text
//! dX = Σ_j S_j a_j(X) dt + Σ_j S_j √a_j(X) dW_j
//! ```
//!
//! Mass-action propensities are `a_j = k_j Π_i X_i^{ν_ij}` over the
//! reactants of reaction `j`. Every reaction contributes an independent
//! noise source when the network is stochastic, and every species is a
//! physically constrained (non-negative) component.

use super::model::{ModelDimensions, SystemEvaluator};
use crate::error::{validation::*, SdeError, SdeResult};
use ndarray::{Array2, ArrayView1, ArrayViewMut1, ArrayViewMut2};

/// A mass-action reaction
#[derive(Debug, Clone)]
pub struct Reaction {
    pub rate: f64,
    pub reactants: Vec<(usize, u32)>,
    pub products: Vec<(usize, u32)>,
}

impl Reaction {
    pub fn new(rate: f64) -> Self {
        Reaction {
            rate,
            reactants: Vec::new(),
            products: Vec::new(),
        }
    }

    pub fn reactant(mut self, species: usize, coefficient: u32) -> Self {
        self.reactants.push((species, coefficient));
        self
    }

    pub fn product(mut self, species: usize, coefficient: u32) -> Self {
        self.products.push((species, coefficient));
        self
    }

    fn propensity(&self, state: &ArrayView1<f64>) -> f64 {
        self.reactants
            .iter()
            .fold(self.rate, |acc, &(species, nu)| {
                acc * state[species].max(0.0).powi(nu as i32)
            })
    }
}

/// Event trigger attached to the network
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    /// Fires when the amount of `species` crosses `level`
    SpeciesLevel { species: usize, level: f64 },
    /// Fires when simulation time reaches the given instant; depends only on
    /// time, so it is a discrete root
    Time(f64),
}

#[derive(Debug, Clone)]
pub struct ReactionNetwork {
    species: usize,
    reactions: Vec<Reaction>,
    triggers: Vec<Trigger>,
    stochastic: bool,
    stoichiometry: Array2<f64>,
}

impl ReactionNetwork {
    pub fn new(species: usize) -> Self {
        ReactionNetwork {
            species,
            reactions: Vec::new(),
            triggers: Vec::new(),
            stochastic: true,
            stoichiometry: Array2::zeros((species, 0)),
        }
    }

    /// Add a reaction; species indices and rate constants are validated
    pub fn with_reaction(mut self, reaction: Reaction) -> SdeResult<Self> {
        validate_non_negative("rate", reaction.rate)?;
        validate_finite("rate", reaction.rate)?;
        for &(species, _) in reaction.reactants.iter().chain(&reaction.products) {
            self.check_species(species)?;
        }
        self.reactions.push(reaction);
        self.rebuild_stoichiometry();
        Ok(self)
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> SdeResult<Self> {
        match trigger {
            Trigger::SpeciesLevel { species, level } => {
                self.check_species(species)?;
                validate_finite("level", level)?;
            }
            Trigger::Time(t) => validate_finite("trigger time", t)?,
        }
        self.triggers.push(trigger);
        Ok(self)
    }

    /// Switch off the diffusion term (reaction-rate ODE limit)
    pub fn deterministic(mut self) -> Self {
        self.stochastic = false;
        self
    }

    pub fn species(&self) -> usize {
        self.species
    }

    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    /// Net stoichiometric matrix, `species × reactions`
    pub fn stoichiometry(&self) -> &Array2<f64> {
        &self.stoichiometry
    }

    fn check_species(&self, species: usize) -> SdeResult<()> {
        if species >= self.species {
            return Err(SdeError::DimensionMismatch {
                what: "species index".to_string(),
                expected: self.species,
                actual: species,
            });
        }
        Ok(())
    }

    fn rebuild_stoichiometry(&mut self) {
        let mut s = Array2::zeros((self.species, self.reactions.len()));
        for (j, reaction) in self.reactions.iter().enumerate() {
            for &(species, nu) in &reaction.reactants {
                s[[species, j]] -= nu as f64;
            }
            for &(species, nu) in &reaction.products {
                s[[species, j]] += nu as f64;
            }
        }
        self.stoichiometry = s;
    }
}

impl SystemEvaluator for ReactionNetwork {
    fn dimensions(&self) -> ModelDimensions {
        let discrete_roots = self
            .triggers
            .iter()
            .enumerate()
            .filter(|(_, trigger)| matches!(trigger, Trigger::Time(_)))
            .map(|(i, _)| i)
            .collect();

        ModelDimensions {
            variables: self.species,
            noise_sources: if self.stochastic { self.reactions.len() } else { 0 },
            roots: self.triggers.len(),
            physical: (0..self.species).collect(),
            discrete_roots,
        }
    }

    fn eval_rate(&self, _time: f64, state: ArrayView1<f64>, mut rates: ArrayViewMut1<f64>) {
        rates.fill(0.0);
        for (j, reaction) in self.reactions.iter().enumerate() {
            let a = reaction.propensity(&state);
            for i in 0..self.species {
                rates[i] += self.stoichiometry[[i, j]] * a;
            }
        }
    }

    fn eval_noise(&self, _time: f64, state: ArrayView1<f64>, mut noise: ArrayViewMut2<f64>) {
        if !self.stochastic {
            return;
        }
        for (j, reaction) in self.reactions.iter().enumerate() {
            let amplitude = reaction.propensity(&state).sqrt();
            for i in 0..self.species {
                noise[[i, j]] = self.stoichiometry[[i, j]] * amplitude;
            }
        }
    }

    fn eval_roots(&self, time: f64, state: ArrayView1<f64>, mut roots: ArrayViewMut1<f64>) {
        for (root, trigger) in roots.iter_mut().zip(&self.triggers) {
            *root = match *trigger {
                Trigger::SpeciesLevel { species, level } => state[species] - level,
                Trigger::Time(at) => time - at,
            };
        }
    }
}
