use crate::error::AlertError;

/// Client-side price threshold alert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertConfig {
    pub target_price: Option<f64>,
    pub enabled: bool,
    pub triggered: bool,
}

impl AlertConfig {
    /// Arms the alert with the target typed by the user.
    /// Rejects anything that is not a finite number and leaves the config untouched.
    pub fn enable(&mut self, input: &str) -> Result<(), AlertError> {
        let target = parse_target(input)?;
        self.target_price = Some(target);
        self.enabled = true;
        self.triggered = false;
        Ok(())
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.triggered = false;
    }

    pub fn toggle(&mut self, input: &str) -> Result<(), AlertError> {
        if self.enabled {
            self.disable();
            Ok(())
        } else {
            self.enable(input)
        }
    }

    /// Clears a pending trigger but keeps monitoring.
    pub fn dismiss(&mut self) {
        self.triggered = false;
    }

    /// Returns true only on the transition into the triggered state.
    pub fn evaluate(&mut self, price: f64) -> bool {
        if !self.enabled || self.triggered {
            return false;
        }
        match self.target_price {
            Some(target) if price >= target => {
                self.triggered = true;
                true
            }
            _ => false,
        }
    }
}

fn parse_target(input: &str) -> Result<f64, AlertError> {
    let trimmed = input.trim();
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(AlertError::InvalidTarget(trimmed.to_string())),
    }
}
