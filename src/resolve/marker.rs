//! Environment markers
//!
//! Evaluates PEP 508 markers such as `sys_platform == "win32"` or
//! `extra == "socks" and python_version < "3.8"` against a resolve target.
//! Variables a target cannot answer (an abstract platform has no
//! `platform_release`) make the evaluation fail instead of guessing.

use crate::interpreter::Implementation;
use crate::platform::Platform;
use crate::resolve::requirement::canonicalize_name;
use crate::resolve::ResolveTarget;
use pep440_rs::{Version, VersionSpecifiers};
use std::collections::BTreeMap;
use std::str::FromStr;

const OPERATORS: [&str; 8] = ["===", "==", "!=", "<=", ">=", "~=", "<", ">"];

/// Variables compared as versions rather than strings
const VERSION_VARIABLES: [&str; 3] = ["python_version", "python_full_version", "implementation_version"];

/// Marker variable values for one resolve target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerEnvironment {
    values: BTreeMap<&'static str, String>,
}

impl MarkerEnvironment {
    pub fn for_target(target: &ResolveTarget) -> Self {
        let mut values = BTreeMap::new();
        match target {
            ResolveTarget::Interpreter(interpreter) => {
                let version = interpreter.version();
                let full = format!("{}.{}.{}", version.major, version.minor, version.patch);
                values.insert("python_version", format!("{}.{}", version.major, version.minor));
                values.insert("python_full_version", full.clone());
                values.insert("implementation_version", full);
                insert_implementation(&mut values, interpreter.implementation());
                if let Some(platform) = interpreter.platform() {
                    insert_os(&mut values, platform);
                }
            }
            ResolveTarget::Platform(platform) => {
                let version = platform.dotted_version();
                values.insert("python_version", version.clone());
                values.insert("python_full_version", version.clone());
                values.insert("implementation_version", version);
                insert_implementation(&mut values, &Implementation::from_name(&platform.implementation));
                insert_os(&mut values, platform);
            }
        }
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

fn insert_implementation(values: &mut BTreeMap<&'static str, String>, implementation: &Implementation) {
    values.insert("implementation_name", implementation.to_string().to_ascii_lowercase());
    values.insert("platform_python_implementation", implementation.to_string());
}

fn insert_os(values: &mut BTreeMap<&'static str, String>, platform: &Platform) {
    let tag = platform.platform.as_str();
    let (sys_platform, system, os_name) = if tag.contains("linux") {
        ("linux", "Linux", "posix")
    } else if tag.starts_with("macosx") {
        ("darwin", "Darwin", "posix")
    } else if tag.starts_with("win") {
        ("win32", "Windows", "nt")
    } else {
        return;
    };
    values.insert("sys_platform", sys_platform.to_string());
    values.insert("platform_system", system.to_string());
    values.insert("os_name", os_name.to_string());

    // linux_x86_64, manylinux_2_17_aarch64, macosx_11_0_arm64, win_amd64
    let machine: Vec<&str> = tag
        .split('_')
        .skip(1)
        .skip_while(|part| part.chars().all(|c| c.is_ascii_digit()))
        .collect();
    if !machine.is_empty() {
        let machine = machine.join("_");
        let machine = if system == "Windows" {
            machine.to_ascii_uppercase()
        } else {
            machine
        };
        values.insert("platform_machine", machine);
    }
}

/// Evaluate `marker` for `environment`, with `extras` the canonical extras
/// requested of the distribution declaring it.
pub fn evaluate(marker: &str, environment: &MarkerEnvironment, extras: &[String]) -> Result<bool, String> {
    let tokens = tokenize(marker)?;
    let mut parser = Parser {
        marker,
        tokens: &tokens,
        pos: 0,
        environment,
        extras,
    };
    let outcome = parser.or_expr()?;
    if parser.pos != tokens.len() {
        return Err(parser.syntax("unexpected trailing input"));
    }
    outcome
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Var(String),
    Str(String),
    Op(String),
    Not,
    And,
    Or,
    Open,
    Close,
}

fn tokenize(marker: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = marker.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' {
            tokens.push(Token::Open);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::Close);
            i += 1;
        } else if c == '"' || c == '\'' {
            let len = chars[i + 1..]
                .iter()
                .position(|&d| d == c)
                .ok_or_else(|| format!("unterminated string in marker '{}'", marker))?;
            tokens.push(Token::Str(chars[i + 1..i + 1 + len].iter().collect()));
            i += len + 2;
        } else if matches!(c, '=' | '!' | '<' | '>' | '~') {
            let op: String = chars[i..]
                .iter()
                .take_while(|d| matches!(d, '=' | '!' | '<' | '>' | '~'))
                .collect();
            if !OPERATORS.contains(&op.as_str()) {
                return Err(format!("unknown operator '{}' in marker '{}'", op, marker));
            }
            i += op.len();
            tokens.push(Token::Op(op));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let word: String = chars[i..]
                .iter()
                .take_while(|d| d.is_ascii_alphanumeric() || matches!(d, '_' | '.'))
                .collect();
            i += word.len();
            tokens.push(match word.as_str() {
                "and" => Token::And,
                "or" => Token::Or,
                "not" => Token::Not,
                "in" => Token::Op("in".to_string()),
                _ => Token::Var(word),
            });
        } else {
            return Err(format!("unexpected '{}' in marker '{}'", c, marker));
        }
    }
    Ok(tokens)
}

/// A decided marker, or why it could not be decided for this target
type Outcome = Result<bool, String>;

struct Parser<'a> {
    marker: &'a str,
    tokens: &'a [Token],
    pos: usize,
    environment: &'a MarkerEnvironment,
    extras: &'a [String],
}

impl Parser<'_> {
    fn or_expr(&mut self) -> Result<Outcome, String> {
        let mut outcome = self.and_expr()?;
        while self.eat(&Token::Or) {
            let rhs = self.and_expr()?;
            outcome = match (outcome, rhs) {
                (Ok(true), _) | (_, Ok(true)) => Ok(true),
                (Err(e), _) | (_, Err(e)) => Err(e),
                _ => Ok(false),
            };
        }
        Ok(outcome)
    }

    fn and_expr(&mut self) -> Result<Outcome, String> {
        let mut outcome = self.atom()?;
        while self.eat(&Token::And) {
            let rhs = self.atom()?;
            outcome = match (outcome, rhs) {
                (Ok(false), _) | (_, Ok(false)) => Ok(false),
                (Err(e), _) | (_, Err(e)) => Err(e),
                _ => Ok(true),
            };
        }
        Ok(outcome)
    }

    fn atom(&mut self) -> Result<Outcome, String> {
        if self.eat(&Token::Open) {
            let outcome = self.or_expr()?;
            if !self.eat(&Token::Close) {
                return Err(self.syntax("missing ')'"));
            }
            return Ok(outcome);
        }
        let lhs = self.value()?;
        let op = self.operator()?;
        let rhs = self.value()?;
        Ok(self.compare(&lhs, &op, &rhs))
    }

    fn value(&mut self) -> Result<Token, String> {
        match self.tokens.get(self.pos) {
            Some(token @ (Token::Var(_) | Token::Str(_))) => {
                self.pos += 1;
                Ok(token.clone())
            }
            _ => Err(self.syntax("expected a variable or a quoted string")),
        }
    }

    fn operator(&mut self) -> Result<String, String> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => {
                self.pos += 1;
                Ok(op.clone())
            }
            Some(Token::Not) => {
                self.pos += 1;
                match self.tokens.get(self.pos) {
                    Some(Token::Op(op)) if op == "in" => {
                        self.pos += 1;
                        Ok("not in".to_string())
                    }
                    _ => Err(self.syntax("expected 'in' after 'not'")),
                }
            }
            _ => Err(self.syntax("expected a comparison operator")),
        }
    }

    fn compare(&self, lhs: &Token, op: &str, rhs: &Token) -> Outcome {
        if let (Token::Var(var), Token::Str(value)) | (Token::Str(value), Token::Var(var)) = (lhs, rhs) {
            if var == "extra" {
                let requested = self.extras.contains(&canonicalize_name(value));
                return match op {
                    "==" => Ok(requested),
                    "!=" => Ok(!requested),
                    _ => Err(format!("unsupported operator '{}' for extra", op)),
                };
            }
        }

        let left = self.resolve(lhs)?;
        let right = self.resolve(rhs)?;
        match op {
            "in" => return Ok(right.contains(left.as_str())),
            "not in" => return Ok(!right.contains(left.as_str())),
            "===" => return Ok(left == right),
            _ => {}
        }

        let version_like = [lhs, rhs]
            .iter()
            .any(|t| matches!(t, Token::Var(v) if VERSION_VARIABLES.contains(&v.as_str())));
        if version_like {
            if let Some(result) = compare_versions(&left, op, &right) {
                return Ok(result);
            }
        }
        match op {
            "==" => Ok(left == right),
            "!=" => Ok(left != right),
            "<" => Ok(left < right),
            "<=" => Ok(left <= right),
            ">" => Ok(left > right),
            ">=" => Ok(left >= right),
            _ => Err(format!("cannot compare '{}' {} '{}'", left, op, right)),
        }
    }

    fn resolve(&self, token: &Token) -> Result<String, String> {
        match token {
            Token::Var(name) => self
                .environment
                .get(name)
                .map(str::to_string)
                .ok_or_else(|| format!("'{}' is not known for this target", name)),
            Token::Str(value) => Ok(value.clone()),
            _ => Err(self.syntax("expected a value")),
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.tokens.get(self.pos) == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn syntax(&self, reason: &str) -> String {
        format!("invalid marker '{}': {}", self.marker, reason)
    }
}

fn compare_versions(left: &str, op: &str, right: &str) -> Option<bool> {
    let version = Version::from_str(left).ok()?;
    let specifiers = VersionSpecifiers::from_str(&format!("{}{}", op, right)).ok()?;
    Some(specifiers.contains(&version))
}
