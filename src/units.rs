//! Unit parsing and conversion for incoming measurement columns.
//!
//! Every value stored in the database is converted to the canonical unit
//! recorded for its column. Parsing is pure; conversion fails hard when
//! dimensions do not match.

use std::fmt;
use thiserror::Error;

/// Base dimensions: length, mass, time, current, temperature,
/// amount of substance, luminous intensity, angle.
const DIMS: usize = 8;

/// Canonical symbol for each base dimension, in display order.
const BASE_SYMBOLS: [&str; DIMS] = ["m", "kg", "s", "A", "K", "mol", "cd", "rad"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnitError {
    #[error("cannot parse unit '{spec}': {reason}")]
    Parse { spec: String, reason: String },

    #[error("incompatible dimensions: '{from}' does not convert to '{to}'")]
    Incompatible { from: String, to: String },
}

/// A parsed unit: a dimension vector plus a scale factor to canonical
/// base units (SI base units, angles in radians).
#[derive(Debug, Clone, Copy)]
pub struct Unit {
    dims: [i8; DIMS],
    factor: f64,
}

impl Unit {
    /// The unit of dimensionless data (blank UNITS cell).
    pub fn dimensionless() -> Self {
        Self {
            dims: [0; DIMS],
            factor: 1.0,
        }
    }

    pub fn is_dimensionless(&self) -> bool {
        self.dims.iter().all(|&d| d == 0)
    }

    /// Whether conversion between the two units is possible.
    pub fn same_dimension(&self, other: &Unit) -> bool {
        self.dims == other.dims
    }

    /// Multiplier that takes a value in `self` to a value in `to`.
    pub fn factor_to(&self, to: &Unit) -> Result<f64, UnitError> {
        if !self.same_dimension(to) {
            return Err(UnitError::Incompatible {
                from: self.to_string(),
                to: to.to_string(),
            });
        }
        Ok(self.factor / to.factor)
    }
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        if self.dims != other.dims {
            return false;
        }
        let scale = self.factor.abs().max(other.factor.abs()).max(f64::MIN_POSITIVE);
        (self.factor - other.factor).abs() / scale < 1e-12
    }
}

impl fmt::Display for Unit {
    /// Canonical dimensional form: base symbols with exponents, `1` when
    /// dimensionless. The scale factor is not rendered.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dimensionless() {
            return write!(f, "1");
        }
        let mut first = true;
        for (i, &exp) in self.dims.iter().enumerate() {
            if exp == 0 {
                continue;
            }
            if !first {
                write!(f, " ")?;
            }
            first = false;
            if exp == 1 {
                write!(f, "{}", BASE_SYMBOLS[i])?;
            } else {
                write!(f, "{}^{}", BASE_SYMBOLS[i], exp)?;
            }
        }
        Ok(())
    }
}

/// Parse a unit spec like `m`, `km/s`, `kg m2 s-2` or `m s^-2`.
///
/// Factors are separated by whitespace or `*`; a single `/` divides
/// everything after it. A blank spec denotes dimensionless data.
pub fn parse_unit(spec: &str) -> Result<Unit, UnitError> {
    let trimmed = spec.trim();
    if trimmed.is_empty() {
        return Ok(Unit::dimensionless());
    }

    let parts: Vec<&str> = trimmed.split('/').collect();
    if parts.len() > 2 {
        return Err(parse_err(spec, "at most one '/' is allowed"));
    }

    let mut dims = [0i8; DIMS];
    let mut factor = 1.0f64;

    for (side, part) in parts.iter().enumerate() {
        let tokens: Vec<&str> = part
            .split(|c: char| c.is_whitespace() || c == '*')
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            let reason = if side == 0 {
                "missing numerator before '/'"
            } else {
                "missing denominator after '/'"
            };
            return Err(parse_err(spec, reason));
        }

        let sign: i8 = if side == 0 { 1 } else { -1 };
        for token in tokens {
            let (tdims, tfactor) = parse_factor(spec, token)?;
            for i in 0..DIMS {
                dims[i] += sign * tdims[i];
            }
            if sign == 1 {
                factor *= tfactor;
            } else {
                factor /= tfactor;
            }
        }
    }

    Ok(Unit { dims, factor })
}

/// Convert `value` from one unit to another, checking dimensions.
pub fn convert(value: f64, from: &Unit, to: &Unit) -> Result<f64, UnitError> {
    Ok(value * from.factor_to(to)?)
}

fn parse_err(spec: &str, reason: impl Into<String>) -> UnitError {
    UnitError::Parse {
        spec: spec.to_string(),
        reason: reason.into(),
    }
}

/// Parse a single factor: `[prefix]symbol[^exp | exp]`.
fn parse_factor(spec: &str, token: &str) -> Result<([i8; DIMS], f64), UnitError> {
    // Bare "1" is a valid dimensionless factor (as in "1/s").
    if token == "1" {
        return Ok(([0; DIMS], 1.0));
    }

    let split = token
        .char_indices()
        .find(|(_, c)| *c == '^' || *c == '-' || c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(token.len());

    let symbol = &token[..split];
    let raw_exp = &token[split..];
    let exp_str = raw_exp.strip_prefix('^').unwrap_or(raw_exp);

    if symbol.is_empty() {
        return Err(parse_err(spec, format!("'{}' has no unit symbol", token)));
    }

    let exp: i32 = if raw_exp.is_empty() {
        1
    } else {
        exp_str.parse().map_err(|_| {
            parse_err(spec, format!("bad exponent '{}' in '{}'", exp_str, token))
        })?
    };

    if !(-9..=9).contains(&exp) {
        return Err(parse_err(
            spec,
            format!("exponent {} out of range in '{}'", exp, token),
        ));
    }

    let (dims, factor) = lookup_symbol(symbol)
        .ok_or_else(|| parse_err(spec, format!("unknown unit '{}'", symbol)))?;

    let mut scaled = [0i8; DIMS];
    for i in 0..DIMS {
        scaled[i] = dims[i] * exp as i8;
    }
    Ok((scaled, factor.powi(exp)))
}

/// Resolve a symbol, trying an exact match before an SI prefix.
fn lookup_symbol(symbol: &str) -> Option<([i8; DIMS], f64)> {
    if let Some(hit) = base_unit(symbol) {
        return Some(hit);
    }
    // "da" is the only two-character prefix.
    for plen in [2, 1] {
        if symbol.len() > plen && symbol.is_char_boundary(plen) {
            let (prefix, rest) = symbol.split_at(plen);
            if let (Some(pf), Some((dims, bf))) = (prefix_factor(prefix), base_unit(rest)) {
                return Some((dims, pf * bf));
            }
        }
    }
    None
}

fn prefix_factor(prefix: &str) -> Option<f64> {
    let f = match prefix {
        "Y" => 1e24,
        "Z" => 1e21,
        "E" => 1e18,
        "P" => 1e15,
        "T" => 1e12,
        "G" => 1e9,
        "M" => 1e6,
        "k" => 1e3,
        "h" => 1e2,
        "da" => 1e1,
        "d" => 1e-1,
        "c" => 1e-2,
        "m" => 1e-3,
        "u" => 1e-6,
        "n" => 1e-9,
        "p" => 1e-12,
        "f" => 1e-15,
        "a" => 1e-18,
        "z" => 1e-21,
        "y" => 1e-24,
        _ => return None,
    };
    Some(f)
}

/// Dimension exponents and canonical-base factor for a bare symbol.
fn base_unit(symbol: &str) -> Option<([i8; DIMS], f64)> {
    const AU: f64 = 1.495_978_707e11;
    const PC: f64 = 3.085_677_581_491_367e16;
    const LY: f64 = 9.460_730_472_580_8e15;
    const DEG: f64 = std::f64::consts::PI / 180.0;

    // dims: [length, mass, time, current, temperature, amount, luminous, angle]
    let hit = match symbol {
        // SI base
        "m" => ([1, 0, 0, 0, 0, 0, 0, 0], 1.0),
        "g" => ([0, 1, 0, 0, 0, 0, 0, 0], 1e-3),
        "s" => ([0, 0, 1, 0, 0, 0, 0, 0], 1.0),
        "A" => ([0, 0, 0, 1, 0, 0, 0, 0], 1.0),
        "K" => ([0, 0, 0, 0, 1, 0, 0, 0], 1.0),
        "mol" => ([0, 0, 0, 0, 0, 1, 0, 0], 1.0),
        "cd" => ([0, 0, 0, 0, 0, 0, 1, 0], 1.0),

        // Angles
        "rad" => ([0, 0, 0, 0, 0, 0, 0, 1], 1.0),
        "deg" => ([0, 0, 0, 0, 0, 0, 0, 1], DEG),
        "arcmin" => ([0, 0, 0, 0, 0, 0, 0, 1], DEG / 60.0),
        "arcsec" => ([0, 0, 0, 0, 0, 0, 0, 1], DEG / 3600.0),
        "mas" => ([0, 0, 0, 0, 0, 0, 0, 1], DEG / 3.6e6),

        // Named derived units
        "Hz" => ([0, 0, -1, 0, 0, 0, 0, 0], 1.0),
        "N" => ([1, 1, -2, 0, 0, 0, 0, 0], 1.0),
        "Pa" => ([-1, 1, -2, 0, 0, 0, 0, 0], 1.0),
        "J" => ([2, 1, -2, 0, 0, 0, 0, 0], 1.0),
        "W" => ([2, 1, -3, 0, 0, 0, 0, 0], 1.0),
        // Spectral flux density, widely used for photometry
        "Jy" => ([0, 1, -2, 0, 0, 0, 0, 0], 1e-26),

        // Time
        "min" => ([0, 0, 1, 0, 0, 0, 0, 0], 60.0),
        "h" => ([0, 0, 1, 0, 0, 0, 0, 0], 3600.0),
        "d" => ([0, 0, 1, 0, 0, 0, 0, 0], 86400.0),
        "day" => ([0, 0, 1, 0, 0, 0, 0, 0], 86400.0),
        // Julian year
        "yr" => ([0, 0, 1, 0, 0, 0, 0, 0], 3.155_76e7),

        // Astronomy
        "au" => ([1, 0, 0, 0, 0, 0, 0, 0], AU),
        "AU" => ([1, 0, 0, 0, 0, 0, 0, 0], AU),
        "pc" => ([1, 0, 0, 0, 0, 0, 0, 0], PC),
        "ly" => ([1, 0, 0, 0, 0, 0, 0, 0], LY),
        "solMass" => ([0, 1, 0, 0, 0, 0, 0, 0], 1.988_92e30),
        "solRad" => ([1, 0, 0, 0, 0, 0, 0, 0], 6.957e8),
        "earthMass" => ([0, 1, 0, 0, 0, 0, 0, 0], 5.972_2e24),
        "earthRad" => ([1, 0, 0, 0, 0, 0, 0, 0], 6.378_1e6),

        _ => return None,
    };
    Some(hit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() / b.abs().max(1.0) < 1e-10, "{} vs {}", a, b);
    }

    #[test]
    fn test_parse_simple() {
        assert!(parse_unit("m").is_ok());
        assert!(parse_unit("kg").is_ok());
        assert!(parse_unit("arcsec").is_ok());
        assert!(parse_unit("solMass").is_ok());
    }

    #[test]
    fn test_blank_is_dimensionless() {
        let u = parse_unit("").unwrap();
        assert!(u.is_dimensionless());
        assert_eq!(parse_unit("  ").unwrap(), u);
    }

    #[test]
    fn test_composite_forms() {
        let a = parse_unit("m s^-2").unwrap();
        let b = parse_unit("m s-2").unwrap();
        let c = parse_unit("m/s2").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);

        let d = parse_unit("kg m2 s-2").unwrap();
        assert_eq!(d, parse_unit("J").unwrap());
    }

    #[test]
    fn test_prefix_resolution() {
        // Exact symbols win over prefix splits: "mas" is milliarcsec,
        // not milli-attosecond.
        assert_close(convert(1.0, &parse_unit("mas").unwrap(), &parse_unit("arcsec").unwrap()).unwrap(), 1e-3);
        assert_close(convert(1.0, &parse_unit("km").unwrap(), &parse_unit("m").unwrap()).unwrap(), 1000.0);
        assert_close(convert(1.0, &parse_unit("kg").unwrap(), &parse_unit("g").unwrap()).unwrap(), 1000.0);
        assert_close(convert(1.0, &parse_unit("uJy").unwrap(), &parse_unit("Jy").unwrap()).unwrap(), 1e-6);
    }

    #[test]
    fn test_malformed_specs() {
        for bad in ["furlong", "m^^2", "m^", "m/s/s", "/s", "m/", "^2", "k"] {
            let err = parse_unit(bad).unwrap_err();
            assert!(
                matches!(err, UnitError::Parse { .. }),
                "expected parse error for '{}'",
                bad
            );
        }
    }

    #[test]
    fn test_convert_checks_dimensions() {
        let m = parse_unit("m").unwrap();
        let s = parse_unit("s").unwrap();
        let err = convert(1.0, &m, &s).unwrap_err();
        assert!(matches!(err, UnitError::Incompatible { .. }));

        // Dimensionless only converts to dimensionless.
        let one = Unit::dimensionless();
        assert!(convert(1.0, &one, &m).is_err());
        assert_close(convert(2.5, &one, &one).unwrap(), 2.5);
    }

    #[test]
    fn test_convert_round_trip() {
        let km = parse_unit("km").unwrap();
        let pc = parse_unit("pc").unwrap();
        let x = 123.456;
        let there = convert(x, &km, &pc).unwrap();
        let back = convert(there, &pc, &km).unwrap();
        assert_close(back, x);
    }

    #[test]
    fn test_canonical_round_trip() {
        for spec in ["m", "km/s", "kg m2 s-2", "arcsec", "Jy", "m s^-2"] {
            let u = parse_unit(spec).unwrap();
            let reparsed = parse_unit(&u.to_string()).unwrap();
            assert!(
                u.same_dimension(&reparsed),
                "canonical form of '{}' changed dimension",
                spec
            );
        }
    }

    #[test]
    fn test_astronomy_scales() {
        let au = parse_unit("au").unwrap();
        let pc = parse_unit("pc").unwrap();
        // 1 pc = 648000/pi au
        let expected = 648_000.0 / std::f64::consts::PI;
        assert_close(convert(1.0, &pc, &au).unwrap(), expected);
    }

    #[test]
    fn test_display_exponents() {
        assert_eq!(parse_unit("m s^-2").unwrap().to_string(), "m s^-2");
        assert_eq!(Unit::dimensionless().to_string(), "1");
        assert_eq!(parse_unit("N").unwrap().to_string(), "m kg s^-2");
    }
}
