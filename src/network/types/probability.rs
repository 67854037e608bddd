use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for probability values
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProbabilityError {
    /// Returned when a value falls outside 0.0..=1.0 (or is NaN)
    #[error("{0} is not in the valid probability range of 0.0 to 1.0")]
    OutOfRange(f64),

    /// Returned when a string can't be parsed as a float
    #[error("'{0}' is not a valid number for a probability value")]
    ParseError(String),
}

/// A probability in `0.0..=1.0`.
///
/// Deserialization goes through [`Probability::new`], so a configuration
/// file can never smuggle in an out-of-range drop rate.
///
/// # Example
///
/// ```
/// use netthrottle::network::types::probability::Probability;
///
/// let p = Probability::new(0.3).unwrap();
/// assert_eq!(p.value(), 0.3);
/// assert!(Probability::new(1.5).is_err());
/// ```
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Probability(f64);

impl Probability {
    /// Never fires.
    pub const NEVER: Probability = Probability(0.0);

    /// Always fires.
    pub const ALWAYS: Probability = Probability(1.0);

    /// Creates a new probability, rejecting anything outside `0.0..=1.0`.
    ///
    /// # Arguments
    ///
    /// * `value` - Probability as a fraction (0.0 to 1.0)
    ///
    /// # Returns
    ///
    /// * `Ok(Probability)` - If the value is within range
    /// * `Err(ProbabilityError::OutOfRange)` - For anything else, NaN included
    pub fn new(value: f64) -> Result<Self, ProbabilityError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(ProbabilityError::OutOfRange(value));
        }

        Ok(Probability(value))
    }

    /// Returns the underlying probability value.
    pub fn value(&self) -> f64 {
        self.0
    }

    /// Whether a uniform sample from `[0, 1)` falls under this probability.
    ///
    /// `0.0` never fires and `1.0` always fires.
    pub fn admits(&self, sample: f64) -> bool {
        sample < self.0
    }

    /// Draws exactly one uniform value from `rng` and tests it.
    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        self.admits(rng.random::<f64>())
    }
}

impl TryFrom<f64> for Probability {
    type Error = ProbabilityError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Probability::new(value)
    }
}

impl From<Probability> for f64 {
    fn from(prob: Probability) -> Self {
        prob.0
    }
}

impl FromStr for Probability {
    type Err = ProbabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: f64 = s
            .trim()
            .parse()
            .map_err(|_| ProbabilityError::ParseError(s.to_string()))?;
        Probability::new(value)
    }
}

impl fmt::Display for Probability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_valid_probability() {
        let p = Probability::new(0.5).unwrap();
        assert_eq!(p.value(), 0.5);
        assert!(Probability::new(0.0).is_ok());
        assert!(Probability::new(1.0).is_ok());
    }

    #[test]
    fn test_invalid_probability() {
        assert!(Probability::new(-0.1).is_err());
        assert!(Probability::new(1.1).is_err());
        assert!(Probability::new(f64::NAN).is_err());
    }

    #[test]
    fn test_from_string() {
        let p = " 0.75".parse::<Probability>().unwrap();
        assert_eq!(p.value(), 0.75);

        assert!("not_a_number".parse::<Probability>().is_err());
        assert!("1.5".parse::<Probability>().is_err());
    }

    #[test]
    fn test_bounds_never_and_always() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            assert!(!Probability::NEVER.roll(&mut rng));
            assert!(Probability::ALWAYS.roll(&mut rng));
        }
        assert!(!Probability::NEVER.admits(0.0));
        assert!(Probability::ALWAYS.admits(0.999_999));
    }

    #[test]
    fn test_deserialize_rejects_out_of_range() {
        let ok: Probability = serde_json::from_str("0.25").unwrap();
        assert_eq!(ok.value(), 0.25);

        let whole: Probability = serde_json::from_str("1").unwrap();
        assert_eq!(whole, Probability::ALWAYS);

        assert!(serde_json::from_str::<Probability>("1.5").is_err());
    }

    #[test]
    fn test_display() {
        let p = Probability::new(0.25).unwrap();
        assert_eq!(format!("{}", p), "0.25");
    }
}
