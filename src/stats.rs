use ndarray::{ArrayBase, Data, Dimension};

/// Renders the first four statistical moments of a buffer plus its extrema and shape.
///
/// Used by the network introspection surface to summarize parameters, gradients
/// and the contents of the live buffer chains.
///
/// # Arguments
/// * `data` - Any ndarray container of `f32`.
///
/// # Returns
/// A single line like `( min -1, max 1, mean 0, stddev 1, skewness 0, kurtosis -2 ) [2x3]`.
pub fn moment_statistics<S, D>(data: &ArrayBase<S, D>) -> String
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    let dims = data
        .shape()
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("x");

    if data.is_empty() {
        return format!("( empty ) [{dims}]");
    }

    let n = data.len() as f64;
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    let mut sum = 0f64;

    for &x in data.iter() {
        min = min.min(x);
        max = max.max(x);
        sum += x as f64;
    }

    let mean = sum / n;
    let (mut m2, mut m3, mut m4) = (0f64, 0f64, 0f64);
    for &x in data.iter() {
        let c = x as f64 - mean;
        let c2 = c * c;
        m2 += c2;
        m3 += c2 * c;
        m4 += c2 * c2;
    }

    let variance = m2 / n;
    let (skewness, kurtosis) = if variance > 0.0 {
        (
            m3 / n / variance.powf(1.5),
            m4 / n / (variance * variance) - 3.0,
        )
    } else {
        (0.0, 0.0)
    };

    format!(
        "( min {min}, max {max}, mean {mean:.6}, stddev {:.6}, skewness {skewness:.6}, kurtosis {kurtosis:.6} ) [{dims}]",
        variance.sqrt()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2, array};

    #[test]
    fn empty_buffer() {
        let buf = Array2::<f32>::zeros((0, 0));
        assert_eq!(moment_statistics(&buf), "( empty ) [0x0]");
    }

    #[test]
    fn constant_buffer_has_no_spread() {
        let buf = Array1::<f32>::from_elem(4, 2.0);
        let stats = moment_statistics(&buf);

        assert!(stats.starts_with("( min 2, max 2, mean 2.000000, stddev 0.000000"));
        assert!(stats.ends_with("[4]"));
    }

    #[test]
    fn symmetric_buffer() {
        let buf = array![[-1.0f32, 1.0], [-1.0, 1.0]];
        let stats = moment_statistics(&buf);

        assert!(stats.contains("min -1, max 1"));
        assert!(stats.contains("stddev 1.000000"));
        assert!(stats.contains("skewness 0.000000"));
        assert!(stats.contains("kurtosis -2.000000"));
        assert!(stats.ends_with("[2x2]"));
    }
}
