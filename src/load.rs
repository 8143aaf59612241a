use crate::error::Error;

/// Number of logical CPUs on the host.
pub fn available_cores() -> f64 {
    num_cpus::get() as f64
}

/// Parse a load specification into a number of (possibly fractional) cores.
///
/// Accepts either an absolute core count (`"1.5"` is one core and a half) or a
/// percentage of all logical cores (`"50%"` on a 4 core host is 2 cores).
pub fn parse_load(spec: &str, available_cores: f64) -> Result<f64, Error> {
    let invalid = || Error::InvalidLoadSpec(spec.to_string());

    if let Ok(value) = spec.parse::<f64>() {
        if !value.is_finite() || value < 0.0 {
            return Err(invalid());
        }
        return Ok(value);
    }

    let prefix = spec.strip_suffix('%').ok_or_else(invalid)?;
    let value: f64 = prefix.parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }

    Ok(value / 100.0 * available_cores)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invalid(spec: &str) {
        match parse_load(spec, 4.0) {
            Err(Error::InvalidLoadSpec(s)) => assert_eq!(s, spec),
            other => panic!("expected InvalidLoadSpec for {:?}, got {:?}", spec, other),
        }
    }

    #[test]
    fn test_absolute_cores() {
        assert_eq!(parse_load("1.5", 4.0).unwrap(), 1.5);
        assert_eq!(parse_load("3", 4.0).unwrap(), 3.0);
    }

    #[test]
    fn test_percentage() {
        assert_eq!(parse_load("50%", 4.0).unwrap(), 2.0);
        assert_eq!(parse_load("62.5%", 4.0).unwrap(), 2.5);
        assert_eq!(parse_load("100%", 8.0).unwrap(), 8.0);
    }

    #[test]
    fn test_zero_is_valid() {
        assert_eq!(parse_load("0", 4.0).unwrap(), 0.0);
        assert_eq!(parse_load("0%", 4.0).unwrap(), 0.0);
    }

    #[test]
    fn test_above_host_capacity_is_not_an_error() {
        assert_eq!(parse_load("16", 4.0).unwrap(), 16.0);
        assert_eq!(parse_load("250%", 4.0).unwrap(), 10.0);
    }

    #[test]
    fn test_plain_numbers_pass_through() {
        for s in ["0.001", "0.25", "1", "2.75", "7.125", "64", "1e1"] {
            let expected: f64 = s.parse().unwrap();
            assert_eq!(parse_load(s, 12.0).unwrap(), expected, "spec {}", s);
        }
    }

    #[test]
    fn test_percent_scales_by_cores() {
        for s in ["1", "12.5", "33", "50", "75.5", "200"] {
            for cores in [1.0, 2.0, 6.0, 64.0] {
                let expected = s.parse::<f64>().unwrap() / 100.0 * cores;
                let got = parse_load(&format!("{}%", s), cores).unwrap();
                assert_eq!(got, expected, "spec {}% on {} cores", s, cores);
            }
        }
    }

    #[test]
    fn test_negative_rejected() {
        assert_invalid("-1");
        assert_invalid("-0.5%");
    }

    #[test]
    fn test_malformed_rejected() {
        assert_invalid("abc%");
        assert_invalid("abc");
        assert_invalid("");
        assert_invalid("%");
        assert_invalid("50%%");
        assert_invalid("%50");
        assert_invalid("5%0");
        assert_invalid("1.5 cores");
    }

    #[test]
    fn test_non_finite_rejected() {
        assert_invalid("inf");
        assert_invalid("NaN");
        assert_invalid("inf%");
    }

    #[test]
    fn test_available_cores_positive() {
        assert!(available_cores() >= 1.0);
    }
}
