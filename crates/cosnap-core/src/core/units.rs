//! Unit expressions and the internal unit system.
//!
//! Snapshots declare their base units as small expression strings such as
//! `"kpc"`, `"Gyr"` or `"1e10*m_sun"`. This module evaluates such expressions
//! to SI magnitudes and converts between a file's declared units and the
//! internal unit system of the current run.
//!
//! Conversion factors are always computed as the ratio of two SI magnitudes
//! obtained by evaluating the respective expressions with the same evaluator.
//! Identical labels therefore yield a factor of exactly `1.0`.

use phf::phf_map;
use thiserror::Error;

/// SI magnitudes of every recognized unit symbol.
static UNIT_SYMBOLS: phf::Map<&'static str, f64> = phf_map! {
    // Length [m]
    "m" => 1.0,
    "cm" => 1e-2,
    "mm" => 1e-3,
    "km" => 1e3,
    "AU" => 1.495978707e11,
    "ly" => 9.4607304725808e15,
    "pc" => 3.0856775814913673e16,
    "kpc" => 3.0856775814913673e19,
    "Mpc" => 3.0856775814913673e22,
    "Gpc" => 3.0856775814913673e25,
    // Time [s]
    "s" => 1.0,
    "minutes" => 60.0,
    "hr" => 3600.0,
    "day" => 86400.0,
    "yr" => 31557600.0,
    "kyr" => 31557600.0e3,
    "Myr" => 31557600.0e6,
    "Gyr" => 31557600.0e9,
    // Mass [kg]
    "g" => 1e-3,
    "kg" => 1.0,
    "m_sun" => 1.98841e30,
};

/// The three base dimensions a snapshot declares units for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Length,
    Time,
    Mass,
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum UnitError {
    #[error("Empty unit expression")]
    Empty,
    #[error("Unexpected character '{ch}' at position {pos} in unit expression \"{expr}\"")]
    UnexpectedChar { expr: String, ch: char, pos: usize },
    #[error("Unknown unit \"{symbol}\" in unit expression \"{expr}\"")]
    UnknownUnit { expr: String, symbol: String },
    #[error("Malformed unit expression \"{expr}\": {reason}")]
    Malformed { expr: String, reason: String },
    #[error("Unit expression \"{0}\" does not evaluate to a finite, positive magnitude")]
    NonPositive(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Symbol(String),
    Plus,
    Minus,
    Star,
    Slash,
    Pow,
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, UnitError> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Pow);
                i += 1;
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::Pow);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        while j < chars.len() && chars[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal.parse::<f64>().map_err(|_| UnitError::Malformed {
                    expr: expr.to_string(),
                    reason: format!("invalid number '{}'", literal),
                })?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Symbol(chars[start..i].iter().collect()));
            }
            other => {
                return Err(UnitError::UnexpectedChar {
                    expr: expr.to_string(),
                    ch: other,
                    pos: i,
                });
            }
        }
    }
    Ok(tokens)
}

struct Parser<'e> {
    expr: &'e str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'e> Parser<'e> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn malformed(&self, reason: impl Into<String>) -> UnitError {
        UnitError::Malformed {
            expr: self.expr.to_string(),
            reason: reason.into(),
        }
    }

    fn sum(&mut self) -> Result<f64, UnitError> {
        let mut value = self.product()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Plus => {
                    self.pos += 1;
                    value += self.product()?;
                }
                Token::Minus => {
                    self.pos += 1;
                    value -= self.product()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn product(&mut self) -> Result<f64, UnitError> {
        let mut value = self.unary()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Star => {
                    self.pos += 1;
                    value *= self.unary()?;
                }
                Token::Slash => {
                    self.pos += 1;
                    value /= self.unary()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, UnitError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, UnitError> {
        let base = self.atom()?;
        if let Some(Token::Pow) = self.peek() {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64, UnitError> {
        match self.next() {
            Some(Token::Number(value)) => Ok(value),
            Some(Token::Symbol(symbol)) => {
                UNIT_SYMBOLS
                    .get(symbol.as_str())
                    .copied()
                    .ok_or_else(|| UnitError::UnknownUnit {
                        expr: self.expr.to_string(),
                        symbol,
                    })
            }
            Some(Token::LParen) => {
                let value = self.sum()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(self.malformed("missing closing parenthesis")),
                }
            }
            Some(token) => Err(self.malformed(format!("unexpected token {:?}", token))),
            None => Err(self.malformed("unexpected end of expression")),
        }
    }
}

/// Evaluates a unit expression to its SI magnitude.
///
/// Supported syntax: decimal and exponent number literals, the unit symbols of
/// the built-in table, `+`, `-`, `*`, `/`, `**` or `^` for powers, unary signs
/// and parentheses.
///
/// # Errors
///
/// Returns [`UnitError`] for empty, malformed, or unknown-symbol expressions.
pub fn eval_unit_si(expr: &str) -> Result<f64, UnitError> {
    if expr.trim().is_empty() {
        return Err(UnitError::Empty);
    }
    let mut parser = Parser {
        expr,
        tokens: tokenize(expr)?,
        pos: 0,
    };
    let value = parser.sum()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.malformed("trailing input"));
    }
    Ok(value)
}

fn eval_base_unit(expr: &str) -> Result<f64, UnitError> {
    let value = eval_unit_si(expr)?;
    if !value.is_finite() || value <= 0.0 {
        return Err(UnitError::NonPositive(expr.to_string()));
    }
    Ok(value)
}

/// The unit labels a snapshot declares, as unevaluated expression strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitLabels {
    pub length: String,
    pub time: String,
    pub mass: String,
}

/// Multiplicative factors converting file values into internal units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitFactors {
    pub length: f64,
    pub time: f64,
    pub mass: f64,
}

impl UnitFactors {
    /// Factor for particle momenta (mass × length / time).
    pub fn momentum(&self) -> f64 {
        self.length / self.time * self.mass
    }

    /// Factor for the fluid density ϱ (mass / length³).
    pub fn density(&self) -> f64 {
        self.mass / self.length.powi(3)
    }

    /// Factor for the fluid momentum density J (mass / (length² × time)).
    pub fn momentum_density(&self) -> f64 {
        self.mass / (self.length.powi(2) * self.time)
    }

    /// Factor for the fluid stress σ, which is stored in units of ϱ·c² and never rescaled.
    pub fn stress(&self) -> f64 {
        1.0
    }

    /// Per-fluid-variable factors, in fluid variable order (ϱ, J, σ).
    pub fn fluid_variables(&self) -> [f64; 3] {
        [self.density(), self.momentum_density(), self.stress()]
    }
}

/// Commonly used physical units expressed in the internal unit system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Units {
    pub km: f64,
    pub kpc: f64,
    pub mpc: f64,
    pub s: f64,
    pub m_sun: f64,
}

impl Units {
    /// Velocity unit km/s.
    pub fn km_per_s(&self) -> f64 {
        self.km / self.s
    }

    /// Hubble unit 100 km s⁻¹ Mpc⁻¹, the `h` normalization of GADGET2.
    pub fn hubble_100(&self) -> f64 {
        100.0 * self.km / (self.s * self.mpc)
    }
}

/// The internal unit system of a run.
///
/// Every length, time and mass handled inside the library is a multiple of
/// these base units.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSystem {
    labels: UnitLabels,
    length_si: f64,
    time_si: f64,
    mass_si: f64,
}

impl UnitSystem {
    /// Builds a unit system from three unit expressions.
    ///
    /// # Errors
    ///
    /// Returns [`UnitError`] if any expression cannot be evaluated or is not positive.
    pub fn new(length: &str, time: &str, mass: &str) -> Result<Self, UnitError> {
        Ok(Self {
            length_si: eval_base_unit(length)?,
            time_si: eval_base_unit(time)?,
            mass_si: eval_base_unit(mass)?,
            labels: UnitLabels {
                length: length.to_string(),
                time: time.to_string(),
                mass: mass.to_string(),
            },
        })
    }

    pub fn labels(&self) -> &UnitLabels {
        &self.labels
    }

    fn si(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Length => self.length_si,
            Dimension::Time => self.time_si,
            Dimension::Mass => self.mass_si,
        }
    }

    /// Evaluates `expr` as a quantity of the given dimension, in internal units.
    pub fn eval(&self, expr: &str, dimension: Dimension) -> Result<f64, UnitError> {
        Ok(eval_unit_si(expr)? / self.si(dimension))
    }

    /// Computes `file_unit / internal_unit` for each declared base unit.
    ///
    /// # Errors
    ///
    /// Returns [`UnitError`] if any of the file's labels cannot be evaluated.
    pub fn conversion_factors(&self, file: &UnitLabels) -> Result<UnitFactors, UnitError> {
        Ok(UnitFactors {
            length: eval_base_unit(&file.length)? / self.length_si,
            time: eval_base_unit(&file.time)? / self.time_si,
            mass: eval_base_unit(&file.mass)? / self.mass_si,
        })
    }

    /// Named physical units expressed in this unit system.
    pub fn units(&self) -> Units {
        let symbol = |name: &str| UNIT_SYMBOLS.get(name).copied().unwrap_or(f64::NAN);
        Units {
            km: symbol("km") / self.length_si,
            kpc: symbol("kpc") / self.length_si,
            mpc: symbol("Mpc") / self.length_si,
            s: symbol("s") / self.time_si,
            m_sun: symbol("m_sun") / self.mass_si,
        }
    }
}
