// Weight initialization bounds.

/// Bound of Kaiming/He uniform initialization U(-bound, bound) with
/// leaky-ReLU slope `a`: `gain * sqrt(3 / fan_in)`, `gain = sqrt(2 / (1 + a²))`.
pub fn kaiming_uniform_bound(fan_in: usize, a: f64) -> f64 {
    let gain = (2.0 / (1.0 + a * a)).sqrt();
    gain * (3.0 / fan_in.max(1) as f64).sqrt()
}

/// Default bound for weights of linear and convolutional layers (`a = √5`),
/// which reduces to `1 / sqrt(fan_in)`.
pub fn default_weight_bound(fan_in: usize) -> f64 {
    kaiming_uniform_bound(fan_in, 5.0_f64.sqrt())
}

/// Default bias bound `1 / sqrt(fan_in)`.
pub fn default_bias_bound(fan_in: usize) -> f64 {
    if fan_in == 0 {
        0.0
    } else {
        1.0 / (fan_in as f64).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_bounds_match_fan_in_rule() {
        assert_relative_eq!(default_weight_bound(16), 0.25, epsilon = 1e-12);
        assert_relative_eq!(default_bias_bound(16), 0.25, epsilon = 1e-12);
        // plain He uniform for ReLU
        assert_relative_eq!(kaiming_uniform_bound(6, 0.0), 1.0, epsilon = 1e-12);
    }
}
